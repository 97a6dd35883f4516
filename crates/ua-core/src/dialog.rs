//! Dialog usage tracking.
//!
//! A dialog is shared state between one or more usages: the INVITE
//! session and any subscriptions established inside it. It terminates
//! only when every usage is gone, and an INVITE usage additionally keeps
//! it alive until BYE completes.

use std::fmt;
use std::sync::{Arc, Mutex};

use tracing::debug;
use uasip_sip_core::{TokenParams, Uri};
use uuid::Uuid;

/// A dialog shared between the connections that use it.
pub type SharedDialog = Arc<Mutex<Dialog>>;

/// Dialog lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DialogState {
    /// Created, no remote tag yet.
    Initialized,
    /// Provisional response with a To tag arrived (INVITE dialogs only).
    Early,
    /// A 2xx or a dialog-confirming NOTIFY arrived.
    Confirmed,
    Terminated,
}

impl fmt::Display for DialogState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DialogState::Initialized => "Initialized",
            DialogState::Early => "Early",
            DialogState::Confirmed => "Confirmed",
            DialogState::Terminated => "Terminated",
        };
        f.write_str(s)
    }
}

/// One dialog and its usages.
#[derive(Debug, Clone)]
pub struct Dialog {
    pub id: String,
    pub call_id: String,
    pub local_tag: String,
    pub remote_tag: Option<String>,
    /// Remote target from the peer's Contact, for mid-dialog requests.
    pub remote_target: Option<Uri>,
    state: DialogState,
    /// Event packages with a live subscription usage.
    subscriptions: Vec<String>,
    /// Set while an INVITE usage is alive; cleared by a BYE 2xx.
    wait_for_bye: bool,
}

impl Dialog {
    pub fn new(call_id: impl Into<String>, local_tag: impl Into<String>) -> Self {
        Dialog {
            id: Uuid::new_v4().to_string(),
            call_id: call_id.into(),
            local_tag: local_tag.into(),
            remote_tag: None,
            remote_target: None,
            state: DialogState::Initialized,
            subscriptions: Vec::new(),
            wait_for_bye: false,
        }
    }

    pub fn state(&self) -> DialogState {
        self.state
    }

    pub fn subscriptions(&self) -> &[String] {
        &self.subscriptions
    }

    pub fn wait_for_bye(&self) -> bool {
        self.wait_for_bye
    }

    fn transition(&mut self, next: DialogState) {
        if self.state != next {
            debug!(dialog = %self.id, from = %self.state, to = %next, "dialog state change");
            self.state = next;
        }
    }

    /// A provisional response carried a remote tag; INVITE dialogs move
    /// to `Early`.
    pub fn on_early(&mut self, remote_tag: &str) {
        if self.state == DialogState::Initialized {
            self.remote_tag = Some(remote_tag.to_string());
            self.transition(DialogState::Early);
        }
    }

    /// A 2xx confirmed the dialog.
    pub fn confirm(&mut self, remote_tag: &str, remote_target: Option<Uri>) {
        if self.remote_tag.is_none() {
            self.remote_tag = Some(remote_tag.to_string());
        }
        if remote_target.is_some() {
            self.remote_target = remote_target;
        }
        if matches!(self.state, DialogState::Initialized | DialogState::Early) {
            self.transition(DialogState::Confirmed);
        }
    }

    /// Marks an INVITE usage: the dialog must outlive its subscriptions
    /// until BYE completes.
    pub fn set_wait_for_bye(&mut self) {
        self.wait_for_bye = true;
    }

    /// Adds a subscription usage for `event` (idempotent).
    pub fn add_subscription(&mut self, event: &str) {
        if !self.subscriptions.iter().any(|e| e == event) {
            self.subscriptions.push(event.to_string());
        }
    }

    /// Applies an incoming NOTIFY for `event`. A terminated
    /// Subscription-State removes that usage and may terminate the
    /// dialog; anything else confirms it.
    pub fn on_notify(&mut self, event: &str, subscription_state: Option<&TokenParams>) {
        let terminated = subscription_state.map(TokenParams::is_terminated).unwrap_or(false);
        if terminated {
            self.subscriptions.retain(|e| e != event);
            self.terminate_if_no_subscriptions();
        } else if matches!(self.state, DialogState::Initialized | DialogState::Early) {
            self.transition(DialogState::Confirmed);
        }
    }

    /// A BYE completed with a 2xx; the INVITE usage is over.
    pub fn on_bye_success(&mut self) {
        self.wait_for_bye = false;
        self.transition(DialogState::Terminated);
    }

    /// Terminates only when no usage remains.
    pub fn terminate_if_no_subscriptions(&mut self) {
        if self.subscriptions.is_empty() && !self.wait_for_bye {
            self.transition(DialogState::Terminated);
        }
    }

    /// Unconditional termination, for connection teardown.
    pub fn terminate(&mut self) {
        self.transition(DialogState::Terminated);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn terminated_state() -> TokenParams {
        TokenParams {
            value: "terminated".into(),
            params: Default::default(),
        }
    }

    fn active_state() -> TokenParams {
        TokenParams {
            value: "active".into(),
            params: Default::default(),
        }
    }

    #[test]
    fn invite_dialog_survives_empty_subscription_list() {
        let mut dialog = Dialog::new("call-1", "tag-a");
        dialog.set_wait_for_bye();
        dialog.confirm("tag-b", None);
        dialog.add_subscription("refer");

        dialog.on_notify("refer", Some(&terminated_state()));
        assert!(dialog.subscriptions().is_empty());
        assert_eq!(dialog.state(), DialogState::Confirmed);

        dialog.on_bye_success();
        assert_eq!(dialog.state(), DialogState::Terminated);
    }

    #[test]
    fn subscription_dialog_terminates_with_last_usage() {
        let mut dialog = Dialog::new("call-2", "tag-a");
        dialog.confirm("tag-b", None);
        dialog.add_subscription("presence");
        dialog.add_subscription("dialog");

        dialog.on_notify("presence", Some(&terminated_state()));
        assert_eq!(dialog.state(), DialogState::Confirmed);

        dialog.on_notify("dialog", Some(&terminated_state()));
        assert_eq!(dialog.state(), DialogState::Terminated);
    }

    #[test]
    fn active_notify_confirms_an_early_dialog() {
        let mut dialog = Dialog::new("call-3", "tag-a");
        dialog.add_subscription("presence");
        dialog.on_notify("presence", Some(&active_state()));
        assert_eq!(dialog.state(), DialogState::Confirmed);
    }

    #[test]
    fn early_only_from_initialized() {
        let mut dialog = Dialog::new("call-4", "tag-a");
        dialog.on_early("tag-b");
        assert_eq!(dialog.state(), DialogState::Early);
        dialog.confirm("tag-b", None);
        dialog.on_early("tag-c");
        assert_eq!(dialog.state(), DialogState::Confirmed);
        assert_eq!(dialog.remote_tag.as_deref(), Some("tag-b"));
    }
}
