//! Push notification template and click handling.

use serde::Serialize;

use crate::config::NotificationConfig;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NotificationAction {
  pub action: String,
  pub title: String,
}

/// A notification ready to be shown.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
  pub title: String,
  pub body: String,
  pub icon: String,
  pub badge: String,
  pub vibrate: Vec<u32>,
  pub actions: Vec<NotificationAction>,
  /// Where "view" leads
  pub url: String,
}

/// Side effect requested by a notification click.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClickOutcome {
  OpenWindow(String),
  Dismissed,
}

/// Build the fixed-template notification for a push payload.
///
/// The payload is plain text; an absent or blank payload uses the default body.
pub fn notification_for_push(payload: Option<&str>, config: &NotificationConfig) -> Notification {
  let body = payload
    .map(str::trim)
    .filter(|text| !text.is_empty())
    .unwrap_or(config.default_body.as_str())
    .to_string();

  Notification {
    title: config.title.clone(),
    body,
    icon: config.icon.clone(),
    badge: config.badge.clone(),
    vibrate: vec![100, 50, 100],
    actions: vec![
      NotificationAction {
        action: "view".to_string(),
        title: "View".to_string(),
      },
      NotificationAction {
        action: "dismiss".to_string(),
        title: "Dismiss".to_string(),
      },
    ],
    url: config.dashboard_url.clone(),
  }
}

/// `view`, or a click on the notification body, opens the dashboard.
pub fn handle_click(action: Option<&str>, config: &NotificationConfig) -> ClickOutcome {
  match action {
    None | Some("") | Some("view") => ClickOutcome::OpenWindow(config.dashboard_url.clone()),
    _ => ClickOutcome::Dismissed,
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_payload_becomes_body() {
    let config = NotificationConfig::default();
    let n = notification_for_push(Some("Your reservation is ready for pickup"), &config);
    assert_eq!(n.body, "Your reservation is ready for pickup");
    assert_eq!(n.title, "Library System");
    assert_eq!(
      n.actions.iter().map(|a| a.action.as_str()).collect::<Vec<_>>(),
      vec!["view", "dismiss"]
    );
  }

  #[test]
  fn test_blank_payload_uses_default_body() {
    let config = NotificationConfig::default();
    assert_eq!(notification_for_push(None, &config).body, config.default_body);
    assert_eq!(notification_for_push(Some("   "), &config).body, config.default_body);
  }

  #[test]
  fn test_clicks() {
    let config = NotificationConfig::default();
    assert_eq!(
      handle_click(Some("view"), &config),
      ClickOutcome::OpenWindow("/dashboard".to_string())
    );
    assert_eq!(
      handle_click(None, &config),
      ClickOutcome::OpenWindow("/dashboard".to_string())
    );
    assert_eq!(handle_click(Some("dismiss"), &config), ClickOutcome::Dismissed);
  }
}
