//! Fixed HTML bodies for violation alerts.

use super::{Alert, AlertStatus};
use crate::dispatch::ResourceKind;

pub fn render(alert: &Alert) -> String {
    let headline = match alert.kind {
        ResourceKind::Firewall => format!(
            "The firewall rule({}) changed by {} violates the current security policy.",
            alert.resource_name, alert.actor
        ),
        ResourceKind::Bucket => format!(
            "The storage bucket ({}) changed by {} violates the current security policy.",
            alert.resource_name, alert.actor
        ),
    };

    let action = match (&alert.status, alert.kind) {
        (AlertStatus::Remediated, ResourceKind::Firewall) => {
            "<p>Therefore, it has been removed.</p>".to_string()
        }
        (AlertStatus::Remediated, ResourceKind::Bucket) => {
            "<p>It has been corrected. Please check the activity logs for details.</p>".to_string()
        }
        (AlertStatus::RevertFailed(detail), _) => format!(
            "<p>Automatic remediation FAILED and the resource may still be exposed: {}</p>\n      <p>Please fix it manually.</p>",
            escape(detail)
        ),
    };

    format!(
        r#"<html>
    <head></head>
    <body>
      <h2><p>{}</p>
      {}
      <p>Thank you!</p></h2>
    </body>
    </html>"#,
        escape(&headline),
        action
    )
}

fn escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}
