use std::env;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context, Result};

use crate::jwt::JwtConfig;

pub const DEFAULT_REVIEW_WINDOW_DAYS: i64 = 10;
pub const DEFAULT_LOGIN_RATE: &str = "5/m";
pub const DEFAULT_MAX_BLUEPRINT_SIZE_MB: u64 = 50;
pub const DEFAULT_MAX_ATTACHMENT_SIZE_MB: u64 = 10;
pub const DEFAULT_SWEEP_INTERVAL_SECS: u64 = 3600;
pub const DEFAULT_REPORT_HOURLY_RATE: f64 = 50.0;

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub jwt: JwtConfig,
    pub review: ReviewConfig,
    pub login_rate: RateSpec,
    pub uploads: UploadLimits,
    pub media_root: PathBuf,
    pub sweep_interval: Option<Duration>,
    /// Take the client address from `X-Forwarded-For`/`X-Real-IP` instead of
    /// the socket peer. Only safe behind a proxy that overwrites them.
    pub trust_proxy_headers: bool,
    /// Price of one logged hour in the budget report.
    pub hourly_rate: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReviewConfig {
    pub window_days: i64,
}

impl Default for ReviewConfig {
    fn default() -> Self {
        Self {
            window_days: DEFAULT_REVIEW_WINDOW_DAYS,
        }
    }
}

/// Upload size ceilings in bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UploadLimits {
    pub max_blueprint_bytes: u64,
    pub max_attachment_bytes: u64,
}

impl Default for UploadLimits {
    fn default() -> Self {
        Self {
            max_blueprint_bytes: DEFAULT_MAX_BLUEPRINT_SIZE_MB * 1024 * 1024,
            max_attachment_bytes: DEFAULT_MAX_ATTACHMENT_SIZE_MB * 1024 * 1024,
        }
    }
}

/// A `<limit>/<period>` rate such as `5/m`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateSpec {
    pub limit: u32,
    pub window: Duration,
}

impl RateSpec {
    pub fn parse(raw: &str) -> Result<Self> {
        let (limit, period) = raw
            .trim()
            .split_once('/')
            .with_context(|| format!("rate '{raw}' must look like '5/m'"))?;
        let limit: u32 = limit
            .trim()
            .parse()
            .with_context(|| format!("rate limit '{limit}' must be an integer"))?;
        let seconds = match period.trim().to_ascii_lowercase().as_str() {
            "s" => 1,
            "m" => 60,
            "h" => 3600,
            "d" => 86_400,
            other => bail!("unknown rate period '{other}'"),
        };
        if limit == 0 {
            bail!("rate limit must be positive");
        }
        Ok(Self {
            limit,
            window: Duration::from_secs(seconds),
        })
    }
}

impl Default for RateSpec {
    fn default() -> Self {
        Self {
            limit: 5,
            window: Duration::from_secs(60),
        }
    }
}

/// Megabytes from the environment as bytes, refusing values that overflow.
fn megabytes(var: &str, mb: u64) -> Result<u64> {
    mb.checked_mul(1024 * 1024)
        .with_context(|| format!("{var} is too large: {mb} MB does not fit in a byte count"))
}

fn flag(raw: &str) -> Result<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" | "" => Ok(false),
        other => bail!("'{other}' is not a boolean"),
    }
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        let jwt = JwtConfig::from_env().map_err(|err| anyhow::anyhow!(err.to_string()))?;

        let window_days = env::var("REVIEW_WINDOW_DAYS")
            .unwrap_or_else(|_| DEFAULT_REVIEW_WINDOW_DAYS.to_string())
            .parse::<i64>()
            .context("REVIEW_WINDOW_DAYS must be an integer")?;
        if window_days < 0 {
            bail!("REVIEW_WINDOW_DAYS must not be negative");
        }

        let login_rate = RateSpec::parse(
            &env::var("LOGIN_RATE_LIMIT").unwrap_or_else(|_| DEFAULT_LOGIN_RATE.to_string()),
        )
        .context("LOGIN_RATE_LIMIT is invalid")?;

        let max_blueprint_mb = env::var("MAX_BLUEPRINT_SIZE_MB")
            .unwrap_or_else(|_| DEFAULT_MAX_BLUEPRINT_SIZE_MB.to_string())
            .parse::<u64>()
            .context("MAX_BLUEPRINT_SIZE_MB must be an integer")?;
        let max_attachment_mb = env::var("MAX_ATTACHMENT_SIZE_MB")
            .unwrap_or_else(|_| DEFAULT_MAX_ATTACHMENT_SIZE_MB.to_string())
            .parse::<u64>()
            .context("MAX_ATTACHMENT_SIZE_MB must be an integer")?;

        let media_root = env::var("MEDIA_ROOT")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("./media"));

        let trust_proxy_headers = env::var("TRUST_PROXY_HEADERS")
            .map(|raw| flag(&raw))
            .unwrap_or(Ok(false))
            .context("TRUST_PROXY_HEADERS is invalid")?;

        let hourly_rate = env::var("REPORT_HOURLY_RATE")
            .unwrap_or_else(|_| DEFAULT_REPORT_HOURLY_RATE.to_string())
            .parse::<f64>()
            .context("REPORT_HOURLY_RATE must be a number")?;
        if !hourly_rate.is_finite() || hourly_rate < 0.0 {
            bail!("REPORT_HOURLY_RATE must be a non-negative number");
        }

        let sweep_secs = env::var("REVIEW_SWEEP_INTERVAL_SECS")
            .unwrap_or_else(|_| DEFAULT_SWEEP_INTERVAL_SECS.to_string())
            .parse::<u64>()
            .context("REVIEW_SWEEP_INTERVAL_SECS must be an integer")?;

        Ok(Self {
            jwt,
            review: ReviewConfig { window_days },
            login_rate,
            uploads: UploadLimits {
                max_blueprint_bytes: megabytes("MAX_BLUEPRINT_SIZE_MB", max_blueprint_mb)?,
                max_attachment_bytes: megabytes("MAX_ATTACHMENT_SIZE_MB", max_attachment_mb)?,
            },
            media_root,
            sweep_interval: (sweep_secs > 0).then(|| Duration::from_secs(sweep_secs)),
            trust_proxy_headers,
            hourly_rate,
        })
    }

    /// Defaults for everything except the signing secret and storage root.
    pub fn with_defaults(jwt_secret: &str, media_root: impl Into<PathBuf>) -> Self {
        Self {
            jwt: JwtConfig::new(jwt_secret),
            review: ReviewConfig::default(),
            login_rate: RateSpec::default(),
            uploads: UploadLimits::default(),
            media_root: media_root.into(),
            sweep_interval: None,
            trust_proxy_headers: false,
            hourly_rate: DEFAULT_REPORT_HOURLY_RATE,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_rate_strings() {
        let spec = RateSpec::parse("5/m").unwrap();
        assert_eq!(spec.limit, 5);
        assert_eq!(spec.window, Duration::from_secs(60));

        let spec = RateSpec::parse(" 100/H ").unwrap();
        assert_eq!(spec.limit, 100);
        assert_eq!(spec.window, Duration::from_secs(3600));
    }

    #[test]
    fn rejects_malformed_rates() {
        assert!(RateSpec::parse("five/m").is_err());
        assert!(RateSpec::parse("5").is_err());
        assert!(RateSpec::parse("5/w").is_err());
        assert!(RateSpec::parse("0/m").is_err());
    }

    #[test]
    fn upload_limits_refuse_overflowing_sizes() {
        assert_eq!(megabytes("MAX_BLUEPRINT_SIZE_MB", 50).unwrap(), 50 * 1024 * 1024);
        let err = megabytes("MAX_BLUEPRINT_SIZE_MB", u64::MAX / 1024).unwrap_err();
        assert!(err.to_string().contains("MAX_BLUEPRINT_SIZE_MB"));
    }

    #[test]
    fn parses_boolean_flags() {
        assert!(flag("true").unwrap());
        assert!(flag(" 1 ").unwrap());
        assert!(!flag("off").unwrap());
        assert!(flag("maybe").is_err());
    }
}
