//! User-facing message templates.
//!
//! Built once at startup and shared read-only. Every template can be
//! overridden from a TOML file whose keys are the template names; missing
//! keys keep the compiled-in text. Placeholders use `{name}` syntax.
//!
//! ```toml
//! start = "Hi {first_name}! Send /auth <token> to begin."
//! auth_invalid = "That token is not valid."
//! ```

use serde::Deserialize;
use std::path::Path;

/// Length of the auth tokens issued to web users.
pub const AUTH_TOKEN_LENGTH: usize = 32;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MessageTemplates {
    /// `{first_name}`
    pub start: String,
    /// `{full_name}`, filled with the sender's first name.
    pub welcome: String,
    pub auth_required: String,
    /// `{server_address}`
    pub telegram_connected: String,
    pub auth_expired: String,
    pub auth_invalid: String,
    /// `{first_name}`
    pub auth_missing_token: String,
    pub agent_error: String,
    pub help: String,
}

impl Default for MessageTemplates {
    fn default() -> Self {
        Self {
            start: "Добро пожаловать, {first_name}!\n\n\
                    om11 — ваш профессиональный AI-помощник.\n\n\
                    Для доступа к функциям бота отправьте команду:\n\
                    👉 /auth <ваш_токен>\n"
                .to_string(),
            welcome: "🌟 Добро пожаловать, {full_name}!\n✅ Вы успешно аутентифицированы.".to_string(),
            auth_required: format!(
                "🔒 Требуется аутентификация\n\n\
                 Для доступа к функциям бота отправьте команду:\n\
                 👉 /auth <ваш_токен>\n\n\
                 🔑 Токен должен содержать {AUTH_TOKEN_LENGTH} символа."
            ),
            telegram_connected: "🤖 Бот успешно подключен!\n\n\
                                 Теперь все логи и уведомления будут приходить сюда.\n\
                                 <a href=\"{server_address}\">⚙️ Управление подключением</a>"
                .to_string(),
            auth_expired: "⏳ Срок действия сессии истек\nПожалуйста, запросите новый токен.".to_string(),
            auth_invalid: "❌ Неверный токен\nПроверьте правильность ввода и попробуйте снова.".to_string(),
            auth_missing_token: "⚠️ {first_name}, укажите токен: /auth <ваш_токен>".to_string(),
            agent_error: "ОШИБКА: произошла непредвиденная ошибка при обращении к агенту".to_string(),
            help: "🛠 Доступные команды:\n\n\
                   /auth <токен> — пройти аутентификацию\n\
                   /help — показать справку"
                .to_string(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum TemplateError {
    #[error("failed to read templates file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse templates file {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: toml::de::Error,
    },
}

impl MessageTemplates {
    /// Load templates from a TOML file, falling back to the defaults for any
    /// key the file does not set.
    pub fn from_file(path: &Path) -> Result<Self, TemplateError> {
        let content = std::fs::read_to_string(path).map_err(|source| TemplateError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml(&content).map_err(|source| TemplateError::Parse {
            path: path.display().to_string(),
            source,
        })
    }

    pub fn from_toml(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    pub fn start(&self, first_name: &str) -> String {
        fill(&self.start, &[("first_name", first_name)])
    }

    pub fn welcome(&self, first_name: &str) -> String {
        fill(&self.welcome, &[("full_name", first_name)])
    }

    pub fn auth_required(&self) -> String {
        self.auth_required.clone()
    }

    pub fn telegram_connected(&self, server_address: &str) -> String {
        fill(&self.telegram_connected, &[("server_address", server_address)])
    }

    pub fn auth_expired(&self) -> String {
        self.auth_expired.clone()
    }

    pub fn auth_invalid(&self) -> String {
        self.auth_invalid.clone()
    }

    pub fn auth_missing_token(&self, first_name: &str) -> String {
        fill(&self.auth_missing_token, &[("first_name", first_name)])
    }

    pub fn agent_error(&self) -> String {
        self.agent_error.clone()
    }

    pub fn help(&self) -> String {
        self.help.clone()
    }
}

/// Replace each `{key}` with its value. Unknown placeholders are left as-is.
fn fill(template: &str, params: &[(&str, &str)]) -> String {
    params
        .iter()
        .fold(template.to_string(), |text, (key, value)| {
            text.replace(&format!("{{{key}}}"), value)
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_start_is_parameterised() {
        let t = MessageTemplates::default();
        let text = t.start("Anna");
        assert!(text.contains("Anna"));
        assert!(!text.contains("{first_name}"));
    }

    #[test]
    fn test_auth_required_mentions_token_length() {
        let t = MessageTemplates::default();
        assert!(t.auth_required().contains(&AUTH_TOKEN_LENGTH.to_string()));
    }

    #[test]
    fn test_telegram_connected_links_server() {
        let t = MessageTemplates::default();
        let text = t.telegram_connected("https://relay.example.com");
        assert!(text.contains("href=\"https://relay.example.com\""));
    }

    #[test]
    fn test_partial_override_keeps_defaults() {
        let t = MessageTemplates::from_toml("welcome = \"Hello {full_name}\"\n").expect("parse");
        assert_eq!(t.welcome("Bob"), "Hello Bob");
        assert_eq!(t.help, MessageTemplates::default().help);
    }

    #[test]
    fn test_unknown_template_name_rejected() {
        assert!(MessageTemplates::from_toml("goodbye = \"bye\"\n").is_err());
    }

    #[test]
    fn test_fill_leaves_unknown_placeholders() {
        assert_eq!(fill("{a} {b}", &[("a", "1")]), "1 {b}");
    }
}
