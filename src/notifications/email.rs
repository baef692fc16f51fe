//! System email service for magic-link and invitation emails.
//!
//! Uses the SMTP settings from the `[email]` config section. When SMTP is not
//! configured the service reports itself disabled and callers fall back to
//! logging the link instead.

use anyhow::Result;
use lettre::{
    message::{header::ContentType, Mailbox, MultiPart, SinglePart},
    transport::smtp::authentication::Credentials,
    AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
};

use crate::config::EmailConfig;

/// Service for sending system emails
pub struct SystemEmailService {
    config: EmailConfig,
}

impl SystemEmailService {
    pub fn new(config: EmailConfig) -> Self {
        Self { config }
    }

    /// Check if email sending is configured and enabled
    pub fn is_enabled(&self) -> bool {
        self.config.is_configured()
    }

    /// Send a magic sign-in link
    pub async fn send_magic_link_email(
        &self,
        to_email: &str,
        link: &str,
        expires_in_minutes: i64,
    ) -> Result<()> {
        let subject = format!("Sign in to {}", self.config.from_name);
        let html_body = render_magic_link_html(&self.config.from_name, link, expires_in_minutes);
        let text_body = render_magic_link_text(&self.config.from_name, link, expires_in_minutes);

        self.send_email(to_email, &subject, &html_body, &text_body)
            .await
    }

    /// Send an organization invitation email
    pub async fn send_invitation_email(
        &self,
        to_email: &str,
        organization_name: &str,
        role: &str,
        inviter_email: &str,
        accept_url: &str,
        expires_in_days: i64,
    ) -> Result<()> {
        let subject = format!(
            "You've been invited to join {} on {}",
            organization_name, self.config.from_name
        );

        let html_body = render_invitation_html(
            organization_name,
            role,
            inviter_email,
            accept_url,
            expires_in_days,
        );
        let text_body = render_invitation_text(
            organization_name,
            role,
            inviter_email,
            accept_url,
            expires_in_days,
        );

        self.send_email(to_email, &subject, &html_body, &text_body)
            .await
    }

    /// Send an email with HTML and plain text versions
    async fn send_email(
        &self,
        to_email: &str,
        subject: &str,
        html_body: &str,
        text_body: &str,
    ) -> Result<()> {
        let smtp_host = self
            .config
            .smtp_host
            .as_ref()
            .ok_or_else(|| anyhow::anyhow!("SMTP host not configured"))?;
        let from_address = self
            .config
            .from_address
            .as_ref()
            .ok_or_else(|| anyhow::anyhow!("From address not configured"))?;

        let from_mailbox = format!("{} <{}>", self.config.from_name, from_address);
        let from: Mailbox = from_mailbox.parse()?;
        let to: Mailbox = to_email.parse()?;

        let email = Message::builder()
            .from(from)
            .to(to)
            .subject(subject)
            .multipart(
                MultiPart::alternative()
                    .singlepart(
                        SinglePart::builder()
                            .header(ContentType::TEXT_PLAIN)
                            .body(text_body.to_string()),
                    )
                    .singlepart(
                        SinglePart::builder()
                            .header(ContentType::TEXT_HTML)
                            .body(html_body.to_string()),
                    ),
            )?;

        let mailer = if self.config.smtp_tls {
            AsyncSmtpTransport::<Tokio1Executor>::relay(smtp_host)?
        } else {
            AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(smtp_host)
        }
        .port(self.config.smtp_port);

        let mailer = if let (Some(username), Some(password)) =
            (&self.config.smtp_username, &self.config.smtp_password)
        {
            mailer.credentials(Credentials::new(username.clone(), password.clone()))
        } else {
            mailer
        };

        mailer.build().send(email).await?;

        tracing::info!(
            to = %to_email,
            subject = %subject,
            "Email sent successfully"
        );

        Ok(())
    }
}

fn render_magic_link_html(service_name: &str, link: &str, expires_in_minutes: i64) -> String {
    format!(
        r#"<!DOCTYPE html>
<html>
<head>
    <meta charset="utf-8">
    <meta name="viewport" content="width=device-width, initial-scale=1.0">
    <title>Sign In</title>
    <style>
        body {{
            font-family: -apple-system, BlinkMacSystemFont, 'Segoe UI', Roboto, 'Helvetica Neue', Arial, sans-serif;
            margin: 0;
            padding: 0;
            background-color: #f8fafc;
        }}
        .container {{ max-width: 540px; margin: 0 auto; padding: 40px 20px; }}
        .card {{
            background-color: #ffffff;
            border-radius: 8px;
            box-shadow: 0 1px 6px rgba(15, 23, 42, 0.08);
            overflow: hidden;
        }}
        .header {{
            background: linear-gradient(135deg, #6366f1 0%, #4f46e5 100%);
            color: white;
            padding: 28px 24px;
            text-align: center;
        }}
        .header h1 {{ margin: 0; font-size: 24px; font-weight: 600; }}
        .content {{ padding: 28px 24px; }}
        .content p {{ margin: 0 0 16px; color: #374151; line-height: 1.6; }}
        .button-container {{ text-align: center; margin: 32px 0; }}
        .button {{
            display: inline-block;
            background: linear-gradient(135deg, #6366f1 0%, #4f46e5 100%);
            color: white !important;
            text-decoration: none;
            padding: 12px 28px;
            border-radius: 6px;
            font-weight: 500;
            font-size: 16px;
        }}
        .note {{ color: #6b7280; font-size: 13px; text-align: center; margin-top: 24px; }}
    </style>
</head>
<body>
    <div class="container">
        <div class="card">
            <div class="header">
                <h1>Sign in to {service_name}</h1>
            </div>
            <div class="content">
                <p>Hi there,</p>
                <p>Click the button below to sign in. No password needed.</p>

                <div class="button-container">
                    <a href="{link}" class="button">Sign In</a>
                </div>

                <p class="note">This link can be used once and expires in {expires_in_minutes} minutes. If you didn't request it, you can safely ignore this email.</p>
            </div>
        </div>
    </div>
</body>
</html>"#,
        service_name = html_escape(service_name),
        link = link,
        expires_in_minutes = expires_in_minutes,
    )
}

fn render_magic_link_text(service_name: &str, link: &str, expires_in_minutes: i64) -> String {
    format!(
        r#"Sign in to {service_name}

Hi there,

Click the link below to sign in. No password needed.

{link}

This link can be used once and expires in {expires_in_minutes} minutes.

If you didn't request it, you can safely ignore this email."#,
        service_name = service_name,
        link = link,
        expires_in_minutes = expires_in_minutes,
    )
}

fn render_invitation_html(
    organization_name: &str,
    role: &str,
    inviter_email: &str,
    accept_url: &str,
    expires_in_days: i64,
) -> String {
    format!(
        r#"<!DOCTYPE html>
<html>
<head>
    <meta charset="utf-8">
    <meta name="viewport" content="width=device-width, initial-scale=1.0">
    <title>Organization Invitation</title>
    <style>
        body {{
            font-family: -apple-system, BlinkMacSystemFont, 'Segoe UI', Roboto, 'Helvetica Neue', Arial, sans-serif;
            margin: 0;
            padding: 0;
            background-color: #f8fafc;
        }}
        .container {{ max-width: 540px; margin: 0 auto; padding: 40px 20px; }}
        .card {{
            background-color: #ffffff;
            border-radius: 8px;
            box-shadow: 0 1px 6px rgba(15, 23, 42, 0.08);
            overflow: hidden;
        }}
        .header {{
            background: linear-gradient(135deg, #6366f1 0%, #4f46e5 100%);
            color: white;
            padding: 28px 24px;
            text-align: center;
        }}
        .header h1 {{ margin: 0; font-size: 24px; font-weight: 600; }}
        .content {{ padding: 28px 24px; }}
        .content p {{ margin: 0 0 16px; color: #374151; line-height: 1.6; }}
        .details {{
            background-color: #f3f4f6;
            border-radius: 6px;
            padding: 16px;
            margin: 20px 0;
        }}
        .details-row {{
            display: flex;
            justify-content: space-between;
            padding: 8px 0;
            border-bottom: 1px solid #e5e7eb;
        }}
        .details-row:last-child {{ border-bottom: none; }}
        .details-label {{ color: #6b7280; font-size: 14px; }}
        .details-value {{ color: #111827; font-weight: 500; }}
        .button-container {{ text-align: center; margin: 32px 0; }}
        .button {{
            display: inline-block;
            background: linear-gradient(135deg, #6366f1 0%, #4f46e5 100%);
            color: white !important;
            text-decoration: none;
            padding: 12px 28px;
            border-radius: 6px;
            font-weight: 500;
            font-size: 16px;
        }}
        .note {{ color: #6b7280; font-size: 13px; text-align: center; margin-top: 24px; }}
    </style>
</head>
<body>
    <div class="container">
        <div class="card">
            <div class="header">
                <h1>Organization Invitation</h1>
            </div>
            <div class="content">
                <p>Hi there,</p>
                <p><strong>{inviter_email}</strong> has invited you to join <strong>{organization_name}</strong>.</p>

                <div class="details">
                    <div class="details-row">
                        <span class="details-label">Organization</span>
                        <span class="details-value">{organization_name}</span>
                    </div>
                    <div class="details-row">
                        <span class="details-label">Role</span>
                        <span class="details-value">{role}</span>
                    </div>
                    <div class="details-row">
                        <span class="details-label">Invited by</span>
                        <span class="details-value">{inviter_email}</span>
                    </div>
                </div>

                <div class="button-container">
                    <a href="{accept_url}" class="button">Accept Invitation</a>
                </div>

                <p class="note">This invitation will expire in {expires_in_days} days. If you didn't expect this invitation, you can safely ignore this email.</p>
            </div>
        </div>
    </div>
</body>
</html>"#,
        inviter_email = html_escape(inviter_email),
        organization_name = html_escape(organization_name),
        role = html_escape(&capitalize_role(role)),
        accept_url = accept_url,
        expires_in_days = expires_in_days,
    )
}

fn render_invitation_text(
    organization_name: &str,
    role: &str,
    inviter_email: &str,
    accept_url: &str,
    expires_in_days: i64,
) -> String {
    format!(
        r#"Organization Invitation

Hi there,

{inviter_email} has invited you to join {organization_name}.

Organization: {organization_name}
Role: {role}
Invited by: {inviter_email}

To accept this invitation, visit:
{accept_url}

This invitation will expire in {expires_in_days} days.

If you didn't expect this invitation, you can safely ignore this email."#,
        inviter_email = inviter_email,
        organization_name = organization_name,
        role = capitalize_role(role),
        accept_url = accept_url,
        expires_in_days = expires_in_days,
    )
}

/// Escape HTML special characters
fn html_escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&#39;")
}

/// Capitalize role for display
fn capitalize_role(role: &str) -> String {
    let mut chars = role.chars();
    match chars.next() {
        None => String::new(),
        Some(first) => first.to_uppercase().chain(chars).collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disabled_without_smtp_host() {
        let service = SystemEmailService::new(EmailConfig::default());
        assert!(!service.is_enabled());
    }

    #[test]
    fn test_html_escape() {
        assert_eq!(html_escape("<script>"), "&lt;script&gt;");
        assert_eq!(html_escape("Acme & Co"), "Acme &amp; Co");
    }

    #[test]
    fn test_render_magic_link_text() {
        let text = render_magic_link_text("Vestibule", "https://example.com/auth/callback?x=1", 15);
        assert!(text.contains("Vestibule"));
        assert!(text.contains("https://example.com/auth/callback?x=1"));
        assert!(text.contains("15 minutes"));
    }

    #[test]
    fn test_render_invitation_html() {
        let html = render_invitation_html(
            "Acme Corp",
            "admin",
            "owner@acme.test",
            "https://example.com/accept",
            7,
        );
        assert!(html.contains("owner@acme.test"));
        assert!(html.contains("Acme Corp"));
        assert!(html.contains("Admin"));
        assert!(html.contains("https://example.com/accept"));
        assert!(html.contains("7 days"));
        assert!(html.contains("<!DOCTYPE html>"));
    }
}
