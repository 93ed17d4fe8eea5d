use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

use crate::logging::LogSettings;

#[derive(Debug, Clone)]
pub struct Config {
    pub host: IpAddr,
    pub port: u16,
    pub logging: LogSettings,
    pub database_url: Option<String>,
    pub intervention_webhook_url: Option<String>,
    pub alert_webhook_url: Option<String>,
    pub delivery_timeout: Duration,
    pub workers: WorkerToggles,
}

#[derive(Debug, Clone)]
pub struct WorkerToggles {
    pub session_reaper: bool,
    pub risk_sweep: bool,
    pub risk_sweep_schedule: String,
}

impl Default for WorkerToggles {
    fn default() -> Self {
        Self {
            session_reaper: true,
            risk_sweep: true,
            risk_sweep_schedule: "0 0 * * * *".to_string(),
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        let port = std::env::var("PORT")
            .ok()
            .and_then(|value| value.parse::<u16>().ok())
            .unwrap_or(3000);

        let host = std::env::var("HOST")
            .ok()
            .and_then(|value| value.parse::<IpAddr>().ok())
            .unwrap_or(IpAddr::V4(Ipv4Addr::new(0, 0, 0, 0)));

        let delivery_timeout = std::env::var("DELIVERY_TIMEOUT_MS")
            .ok()
            .and_then(|value| value.parse::<u64>().ok())
            .map(Duration::from_millis)
            .unwrap_or(Duration::from_secs(5));

        let defaults = WorkerToggles::default();
        let workers = WorkerToggles {
            session_reaper: env_bool("ENABLE_SESSION_REAPER").unwrap_or(defaults.session_reaper),
            risk_sweep: env_bool("ENABLE_RISK_SWEEP").unwrap_or(defaults.risk_sweep),
            risk_sweep_schedule: non_empty_var("RISK_SWEEP_SCHEDULE")
                .unwrap_or(defaults.risk_sweep_schedule),
        };

        Self {
            host,
            port,
            logging: LogSettings::from_env(),
            database_url: non_empty_var("DATABASE_URL"),
            intervention_webhook_url: non_empty_var("INTERVENTION_WEBHOOK_URL"),
            alert_webhook_url: non_empty_var("ALERT_WEBHOOK_URL"),
            delivery_timeout,
            workers,
        }
    }

    pub fn bind_addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }
}

pub(crate) fn non_empty_var(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

pub(crate) fn env_bool(key: &str) -> Option<bool> {
    let value = std::env::var(key).ok()?;
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "y" | "on" => Some(true),
        "0" | "false" | "no" | "n" | "off" => Some(false),
        _ => None,
    }
}
