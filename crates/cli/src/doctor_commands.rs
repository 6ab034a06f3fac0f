//! `fluidmcp doctor` — audits the resolved config and local environment
//! before a gateway boot, printing a structured report with `[ok]`, `[warn]`,
//! or `[fail]` status indicators per check.

use crate::config::GatewayConfig;

const GREEN: &str = "\x1b[32m";
const RED: &str = "\x1b[31m";
const YELLOW: &str = "\x1b[33m";
const BOLD: &str = "\x1b[1m";
const RESET: &str = "\x1b[0m";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Status {
    Ok,
    Warn,
    Fail,
}

impl Status {
    fn label(self) -> &'static str {
        match self {
            Self::Ok => "ok",
            Self::Warn => "warn",
            Self::Fail => "fail",
        }
    }

    fn color(self) -> &'static str {
        match self {
            Self::Ok => GREEN,
            Self::Warn => YELLOW,
            Self::Fail => RED,
        }
    }
}

struct CheckItem {
    status: Status,
    message: String,
}

struct Section {
    title: String,
    items: Vec<CheckItem>,
}

impl Section {
    fn new(title: impl Into<String>) -> Self {
        Self { title: title.into(), items: Vec::new() }
    }

    fn push(&mut self, status: Status, message: impl Into<String>) {
        self.items.push(CheckItem { status, message: message.into() });
    }
}

fn print_report(sections: &[Section]) -> (usize, usize) {
    let mut errors = 0usize;
    let mut warnings = 0usize;

    for section in sections {
        eprintln!("{BOLD}{}{RESET}", section.title);
        for item in &section.items {
            let color = item.status.color();
            let label = item.status.label();
            eprintln!("  [{color}{label}{RESET}]  {}", item.message);
            match item.status {
                Status::Fail => errors += 1,
                Status::Warn => warnings += 1,
                Status::Ok => {},
            }
        }
        eprintln!();
    }

    (errors, warnings)
}

fn check_security(config: &GatewayConfig) -> Section {
    let mut section = Section::new("Security");

    if config.secure_mode && config.bearer_token.is_some() {
        section.push(Status::Ok, "FMCP_SECURE_MODE is on and a bearer token is set");
    } else if config.secure_mode {
        section.push(Status::Fail, "FMCP_SECURE_MODE is on but no bearer token is configured");
    } else {
        section.push(Status::Warn, "auth is disabled; every request is accepted without a token");
    }

    section
}

async fn check_database(config: &GatewayConfig) -> Section {
    let mut section = Section::new("Database");

    match &config.database_url {
        None => section.push(Status::Warn, "no database_url set; state resets on every restart"),
        Some(url) => match sqlx::SqlitePool::connect(url).await {
            Ok(pool) => {
                section.push(Status::Ok, format!("connected to {url}"));
                pool.close().await;
            },
            Err(e) => section.push(Status::Fail, format!("failed to connect to {url}: {e}")),
        },
    }

    section
}

fn check_allowed_commands(config: &GatewayConfig) -> Section {
    let mut section = Section::new("Allowed commands");

    for command in fluidmcp_manager::allowlist::DEFAULT_ALLOWED_COMMANDS
        .iter()
        .copied()
        .chain(config.allowed_commands.iter().map(String::as_str))
    {
        match which::which(command) {
            Ok(path) => section.push(Status::Ok, format!("{command} -> {}", path.display())),
            Err(_) => section.push(Status::Warn, format!("{command} not found on PATH")),
        }
    }

    section
}

pub async fn handle_doctor(config: &GatewayConfig) -> anyhow::Result<()> {
    eprintln!("{BOLD}fluidmcp doctor{RESET}");
    eprintln!("{BOLD}==============={RESET}\n");

    let sections = vec![
        check_security(config),
        check_database(config).await,
        check_allowed_commands(config),
    ];

    let (errors, warnings) = print_report(&sections);
    eprintln!("{BOLD}Summary:{RESET} {errors} error(s), {warnings} warning(s)");

    if errors > 0 {
        std::process::exit(1);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disabled_auth_warns_not_fails() {
        let config = GatewayConfig::default();
        let section = check_security(&config);
        assert!(section.items.iter().all(|i| i.status != Status::Fail));
    }

    #[test]
    fn secure_mode_without_token_fails() {
        let config = GatewayConfig { secure_mode: true, bearer_token: None, ..GatewayConfig::default() };
        let section = check_security(&config);
        assert!(section.items.iter().any(|i| i.status == Status::Fail));
    }

    #[tokio::test]
    async fn missing_database_url_warns() {
        let config = GatewayConfig::default();
        let section = check_database(&config).await;
        assert!(section.items.iter().any(|i| i.status == Status::Warn));
    }
}
