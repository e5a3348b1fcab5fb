//! Contact list with live presence.
//!
//! Profiles come from the document store, presence from `status/*` in the
//! realtime store. The realtime record wins over the mirrored profile
//! fields whenever both exist.

use std::sync::{Arc, Mutex, PoisonError};

use serde_json::{Map, Value};
use tokio::sync::watch;
use tracing::{debug, warn};

use ebchat_shared::{PresenceRecord, RealtimePath, Timestamp, UserId, UserProfile};

use crate::session::SessionContext;
use crate::subscription::Subscription;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Contact {
    pub profile: UserProfile,
    pub is_online: bool,
    pub last_seen: Timestamp,
}

impl Contact {
    pub fn uid(&self) -> &UserId {
        &self.profile.uid
    }

    pub fn status_line(&self, now: Timestamp) -> String {
        format_last_seen(now, self.last_seen, self.is_online)
    }
}

/// Human readable presence: `Online`, `Just now`, `5m ago`, `3h ago`,
/// `2d ago`, or `Offline` when nothing is known.
pub fn format_last_seen(now: Timestamp, last_seen: Timestamp, is_online: bool) -> String {
    if is_online {
        return "Online".to_string();
    }
    if last_seen <= 0 {
        return "Offline".to_string();
    }
    let minutes = (now - last_seen).max(0) / 60_000;
    if minutes < 1 {
        "Just now".to_string()
    } else if minutes < 60 {
        format!("{minutes}m ago")
    } else if minutes < 60 * 24 {
        format!("{}h ago", minutes / 60)
    } else {
        format!("{}d ago", minutes / (60 * 24))
    }
}

/// Build the list shown to `me`: the assistant first, then every other
/// profile with presence overlaid from `status`.
pub fn merge_contacts(
    me: &UserId,
    assistant: UserProfile,
    profiles: &[UserProfile],
    status: &Map<String, Value>,
) -> Vec<Contact> {
    let mut contacts = Vec::with_capacity(profiles.len() + 1);
    contacts.push(Contact {
        is_online: true,
        last_seen: assistant.last_seen,
        profile: assistant,
    });

    for profile in profiles {
        if &profile.uid == me || profile.uid.is_assistant() {
            continue;
        }
        let live = status
            .get(profile.uid.as_str())
            .and_then(|v| serde_json::from_value::<PresenceRecord>(v.clone()).ok());
        let (is_online, last_seen) = match live {
            Some(record) => (record.is_online, record.last_seen.max(profile.last_seen)),
            None => (profile.is_online, profile.last_seen),
        };
        let visible = profile.settings.show_online_status;
        contacts.push(Contact {
            profile: profile.clone(),
            is_online: visible && is_online,
            last_seen: if visible { last_seen } else { 0 },
        });
    }
    contacts
}

#[derive(Default)]
struct Inputs {
    profiles: Vec<UserProfile>,
    status: Map<String, Value>,
}

struct Shared {
    me: UserId,
    assistant: UserProfile,
    inputs: Mutex<Inputs>,
    contacts: watch::Sender<Vec<Contact>>,
}

impl Shared {
    fn with_inputs(&self, change: impl FnOnce(&mut Inputs)) {
        let mut inputs = self.inputs.lock().unwrap_or_else(PoisonError::into_inner);
        change(&mut inputs);
        let merged = merge_contacts(&self.me, self.assistant.clone(), &inputs.profiles, &inputs.status);
        debug!(contacts = merged.len(), "contact list recomputed");
        self.contacts.send_replace(merged);
    }
}

pub struct ContactDirectory {
    shared: Arc<Shared>,
    profiles: Subscription,
    presence: Subscription,
}

impl ContactDirectory {
    pub fn start(ctx: Arc<SessionContext>) -> Self {
        let assistant = ctx.assistant_profile();
        let (contacts, _) = watch::channel(merge_contacts(ctx.uid(), assistant.clone(), &[], &Map::new()));
        let shared = Arc::new(Shared {
            me: ctx.uid().clone(),
            assistant,
            inputs: Mutex::new(Inputs::default()),
            contacts,
        });

        let profiles = match ctx.documents().subscribe_profiles() {
            Ok(listener) => {
                let shared = shared.clone();
                Subscription::spawn("contacts", listener, move |profiles| {
                    shared.with_inputs(|inputs| inputs.profiles = profiles);
                    async {}
                })
            }
            Err(e) => {
                warn!(error = %e, "contact listing unavailable, showing assistant only");
                ctx.notices().error("Could not load contacts.");
                Subscription::inactive("contacts")
            }
        };

        let presence = match ctx.realtime().subscribe(&RealtimePath::status_root()) {
            Ok(listener) => {
                let shared = shared.clone();
                Subscription::spawn("contact-presence", listener, move |snapshot| {
                    let status = match snapshot {
                        Some(Value::Object(map)) => map,
                        _ => Map::new(),
                    };
                    shared.with_inputs(|inputs| inputs.status = status);
                    async {}
                })
            }
            Err(e) => {
                warn!(error = %e, "live presence unavailable, using profile mirror");
                Subscription::inactive("contact-presence")
            }
        };
        let profiles = ctx.adopt(profiles);
        let presence = ctx.adopt(presence);

        Self {
            shared,
            profiles,
            presence,
        }
    }

    pub fn contacts(&self) -> Vec<Contact> {
        self.shared.contacts.borrow().clone()
    }

    pub fn watch(&self) -> watch::Receiver<Vec<Contact>> {
        self.shared.contacts.subscribe()
    }

    pub fn find(&self, uid: &UserId) -> Option<Contact> {
        self.shared
            .contacts
            .borrow()
            .iter()
            .find(|c| c.uid() == uid)
            .cloned()
    }

    pub fn stop(&mut self) {
        self.profiles.stop();
        self.presence.stop();
    }
}
