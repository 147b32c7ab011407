//! Outbound notification dispatch.
//!
//! Callers submit a [`Notification`] and move on; a background worker owns
//! the SMTP transport and retries delivery with backoff. Delivery failure is
//! logged and never propagated back to the request path.

use lettre::{
    message::header::ContentType, transport::smtp::authentication::Credentials, Message,
    SmtpTransport, Transport,
};
use tokio::sync::mpsc;

use crate::config::SmtpConfig;

const MAX_DELIVERY_ATTEMPTS: u32 = 3;

#[derive(Debug, Clone)]
pub enum Notification {
    EnrollmentConfirmed {
        email: String,
        course_title: String,
        access_url: String,
    },
    CertificateIssued {
        email: String,
        course_title: String,
        certificate_number: String,
        artifact_url: Option<String>,
    },
    QuizResult {
        email: String,
        quiz_title: String,
        score: f64,
        passed: bool,
    },
}

impl Notification {
    pub fn recipient(&self) -> &str {
        match self {
            Self::EnrollmentConfirmed { email, .. }
            | Self::CertificateIssued { email, .. }
            | Self::QuizResult { email, .. } => email,
        }
    }

    pub fn subject(&self) -> String {
        match self {
            Self::EnrollmentConfirmed { course_title, .. } => {
                format!("Welcome to {course_title}")
            }
            Self::CertificateIssued { course_title, .. } => {
                format!("Your {course_title} certificate")
            }
            Self::QuizResult { quiz_title, .. } => format!("Quiz result: {quiz_title}"),
        }
    }

    pub fn body(&self) -> String {
        match self {
            Self::EnrollmentConfirmed {
                course_title,
                access_url,
                ..
            } => format!(
                "You have been enrolled in {course_title}.\n\
                 Visit {access_url} to start learning."
            ),
            Self::CertificateIssued {
                course_title,
                certificate_number,
                artifact_url,
                ..
            } => {
                let mut body = format!(
                    "Congratulations! You have completed {course_title}.\n\
                     Certificate number: {certificate_number}"
                );
                if let Some(url) = artifact_url {
                    body.push_str(&format!("\nDownload: {url}"));
                }
                body
            }
            Self::QuizResult {
                quiz_title,
                score,
                passed,
                ..
            } => {
                let status = if *passed { "PASSED" } else { "FAILED" };
                format!("You scored {score:.2}% on {quiz_title}: {status}")
            }
        }
    }
}

/// Fire-and-forget submission handle. Cloning is cheap; all clones feed the
/// same worker.
#[derive(Clone)]
pub struct NotificationDispatcher {
    tx: mpsc::UnboundedSender<Notification>,
}

impl NotificationDispatcher {
    pub fn new(config: SmtpConfig) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(deliver_loop(config, rx));
        Self { tx }
    }

    pub fn dispatch(&self, notification: Notification) {
        if self.tx.send(notification).is_err() {
            tracing::warn!("notification worker is gone, dropping notification");
        }
    }
}

async fn deliver_loop(config: SmtpConfig, mut rx: mpsc::UnboundedReceiver<Notification>) {
    while let Some(notification) = rx.recv().await {
        let mut delivered = false;
        for attempt in 0..MAX_DELIVERY_ATTEMPTS {
            if attempt > 0 {
                tokio::time::sleep(std::time::Duration::from_secs(1 << attempt)).await;
            }
            match send_mail(&config, &notification).await {
                Ok(()) => {
                    delivered = true;
                    break;
                }
                Err(e) => {
                    tracing::warn!(
                        attempt = attempt + 1,
                        recipient = notification.recipient(),
                        "notification delivery failed: {e}"
                    );
                }
            }
        }
        if !delivered {
            tracing::error!(
                recipient = notification.recipient(),
                "giving up on notification after {MAX_DELIVERY_ATTEMPTS} attempts"
            );
        }
    }
}

async fn send_mail(config: &SmtpConfig, notification: &Notification) -> Result<(), String> {
    let message = Message::builder()
        .from(
            config
                .from_address
                .parse()
                .map_err(|e| format!("invalid from address: {e}"))?,
        )
        .to(notification
            .recipient()
            .parse()
            .map_err(|e| format!("invalid recipient: {e}"))?)
        .subject(notification.subject())
        .header(ContentType::TEXT_PLAIN)
        .body(notification.body())
        .map_err(|e| format!("failed to build message: {e}"))?;

    let transport = SmtpTransport::starttls_relay(&config.host)
        .map_err(|e| format!("smtp relay error: {e}"))?
        .port(config.port)
        .credentials(Credentials::new(
            config.username.clone(),
            config.password.clone(),
        ))
        .build();

    // lettre's SmtpTransport is blocking; keep it off the runtime threads.
    tokio::task::spawn_blocking(move || transport.send(&message).map(|_| ()))
        .await
        .map_err(|e| format!("send task panicked: {e}"))?
        .map_err(|e| format!("smtp send failed: {e}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_enrollment_notification_content() {
        let n = Notification::EnrollmentConfirmed {
            email: "student@example.com".to_string(),
            course_title: "Rust Basics".to_string(),
            access_url: "http://localhost:3000/courses/abc".to_string(),
        };
        assert_eq!(n.recipient(), "student@example.com");
        assert_eq!(n.subject(), "Welcome to Rust Basics");
        assert!(n.body().contains("Rust Basics"));
        assert!(n.body().contains("http://localhost:3000/courses/abc"));
    }

    #[test]
    fn test_certificate_notification_includes_number_and_url() {
        let n = Notification::CertificateIssued {
            email: "student@example.com".to_string(),
            course_title: "Rust Basics".to_string(),
            certificate_number: "CERT-12345678-ABCDEF01-FF00FF00".to_string(),
            artifact_url: Some("https://cdn.example.com/cert.pdf".to_string()),
        };
        let body = n.body();
        assert!(body.contains("CERT-12345678-ABCDEF01-FF00FF00"));
        assert!(body.contains("https://cdn.example.com/cert.pdf"));
    }

    #[test]
    fn test_certificate_notification_without_artifact() {
        let n = Notification::CertificateIssued {
            email: "student@example.com".to_string(),
            course_title: "Rust Basics".to_string(),
            certificate_number: "CERT-1-2-3".to_string(),
            artifact_url: None,
        };
        assert!(!n.body().contains("Download"));
    }

    #[test]
    fn test_quiz_result_notification_status() {
        let passed = Notification::QuizResult {
            email: "s@example.com".to_string(),
            quiz_title: "Module 1".to_string(),
            score: 75.0,
            passed: true,
        };
        assert!(passed.body().contains("PASSED"));
        assert!(passed.body().contains("75.00%"));

        let failed = Notification::QuizResult {
            email: "s@example.com".to_string(),
            quiz_title: "Module 1".to_string(),
            score: 40.0,
            passed: false,
        };
        assert!(failed.body().contains("FAILED"));
    }
}
