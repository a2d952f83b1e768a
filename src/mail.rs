use anyhow::{Context, Result};
use lettre::message::header::ContentType;
use lettre::message::Mailbox;
use lettre::{Message, SmtpTransport, Transport};
use tracing::info;

use crate::config::RunConfiguration;
use crate::report::MessageBody;

pub struct MailSettings {
    pub from: String,
    pub smtp_host: String,
    pub subject_tag: String,
}

/// Where the finished report went.
#[derive(Debug, PartialEq, Eq)]
pub enum Delivery {
    Suppressed,
    Printed,
    Mailed(usize),
}

pub fn subject(tag: &str, body: &MessageBody) -> String {
    format!(
        "[{}] iptracking maintenance and report run, {}",
        tag,
        body.official_timestamp()
    )
}

pub fn build_message(settings: &MailSettings, recipients: &[String], body: &MessageBody) -> Result<Message> {
    let from: Mailbox = settings
        .from
        .parse()
        .with_context(|| format!("Invalid sender address '{}'", settings.from))?;
    let mut builder = Message::builder()
        .from(from)
        .subject(subject(&settings.subject_tag, body))
        .header(ContentType::TEXT_PLAIN);
    for recipient in recipients {
        let to: Mailbox = recipient
            .parse()
            .with_context(|| format!("Invalid recipient address '{}'", recipient))?;
        builder = builder.to(to);
    }
    builder
        .body(body.render())
        .context("Failed to build report message")
}

/// Print or mail the report. An empty report goes nowhere.
pub fn deliver(body: &MessageBody, config: &RunConfiguration, settings: &MailSettings) -> Result<Delivery> {
    if body.is_empty() {
        info!(action = "deliver", component = "mail", "Report is empty; nothing to deliver");
        return Ok(Delivery::Suppressed);
    }
    if !config.has_recipients() {
        println!("{}", body);
        return Ok(Delivery::Printed);
    }

    let recipients = &config.recipients;
    let message = build_message(settings, recipients, body)?;
    let mailer = SmtpTransport::builder_dangerous(&settings.smtp_host).build();
    mailer
        .send(&message)
        .with_context(|| format!("Failed to send report through {}", settings.smtp_host))?;
    info!(action = "deliver", component = "mail", recipient_count = recipients.len(), relay = %settings.smtp_host, "Report mailed");
    Ok(Delivery::Mailed(recipients.len()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings() -> MailSettings {
        MailSettings {
            from: "root@cluster.example.edu".into(),
            smtp_host: "localhost".into(),
            subject_tag: "Caviness".into(),
        }
    }

    #[test]
    fn empty_report_is_not_delivered() {
        let body = MessageBody::new(&RunConfiguration::default());
        let config = RunConfiguration {
            recipients: vec!["ops@example.edu".to_string()],
            ..Default::default()
        };
        // Would fail to reach a relay if it tried.
        let unreachable = MailSettings {
            smtp_host: "relay.invalid".into(),
            ..settings()
        };
        assert_eq!(deliver(&body, &config, &unreachable).unwrap(), Delivery::Suppressed);
        assert_eq!(
            deliver(&body, &RunConfiguration::default(), &settings()).unwrap(),
            Delivery::Suppressed
        );
    }

    #[test]
    fn message_carries_subject_and_recipients() {
        let mut body = MessageBody::new(&RunConfiguration::default());
        body.append(["## Event removal", "Removed logged events older than 10 day(s): 3 tuples"]);
        let recipients = vec!["ops@example.edu".to_string(), "sec@example.edu".to_string()];
        let message = build_message(&settings(), &recipients, &body).unwrap();

        assert_eq!(message.envelope().to().len(), 2);
        assert_eq!(
            subject("Caviness", &body),
            format!(
                "[Caviness] iptracking maintenance and report run, {}",
                body.official_timestamp()
            )
        );
        let raw = String::from_utf8(message.formatted()).unwrap();
        assert!(raw.contains("Subject: [Caviness] iptracking maintenance"));
        assert!(raw.contains("From: root@cluster.example.edu"));
    }

    #[test]
    fn bad_sender_is_an_error() {
        let body = MessageBody::new(&RunConfiguration::default());
        let bad = MailSettings {
            from: "nobody at all".into(),
            ..settings()
        };
        assert!(build_message(&bad, &["ops@example.edu".to_string()], &body).is_err());
    }
}
