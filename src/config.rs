use crate::browser::session::RenderSettings;
use crate::engine::arbitration::ArbitrationPolicy;
use crate::engine::preference::PreferenceSettings;
use crate::engine::EngineSettings;
use crate::error::PriceWatchError;
use crate::extract::NetworkSettings;
use crate::vision::VisionSettings;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

const DEFAULT_DETECTOR_URL: &str = "http://yolo-service:8000";
const DEFAULT_RECOGNIZER_URL: &str = "http://tesseract-service:5000";

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub debug: bool,
    pub browser_path: Option<PathBuf>,
    pub data_dir: PathBuf,
    pub currency: String,
    pub detector_url: String,
    pub recognizer_url: String,
    pub detection_threshold: f64,
    pub network_confidence: f64,
    pub timeouts: Timeouts,
    pub policy: ArbitrationPolicy,
    pub preference: PreferenceSettings,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Timeouts {
    pub network: Duration,
    pub vision: Duration,
    /// Per request to the detector or recognizer.
    pub request: Duration,
    pub settle: Duration,
    pub capture: Duration,
    pub challenge: Duration,
    /// Opening, loading and settling the page, challenge wait included.
    pub render: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            network: Duration::from_secs(20),
            vision: Duration::from_secs(30),
            request: Duration::from_secs(10),
            settle: Duration::from_secs(2),
            capture: Duration::from_secs(2),
            challenge: Duration::from_secs(12),
            render: Duration::from_secs(45),
        }
    }
}

/// Values given on the command line.
#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
    pub debug: bool,
    pub currency: Option<String>,
    pub data_dir: Option<PathBuf>,
}

#[derive(Debug, Deserialize, Default)]
struct ConfigFile {
    #[serde(default)]
    defaults: ConfigDefaults,
    #[serde(default)]
    services: ConfigServices,
    #[serde(default)]
    timeouts: ConfigTimeouts,
    #[serde(default)]
    arbitration: Option<ArbitrationPolicy>,
    #[serde(default)]
    preference: Option<PreferenceSettings>,
}

#[derive(Debug, Deserialize, Default)]
struct ConfigDefaults {
    currency: Option<String>,
    browser_path: Option<String>,
    data_dir: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct ConfigServices {
    detector_url: Option<String>,
    recognizer_url: Option<String>,
    detection_threshold: Option<f64>,
    network_confidence: Option<f64>,
}

#[derive(Debug, Deserialize, Default)]
struct ConfigTimeouts {
    network_secs: Option<u64>,
    vision_secs: Option<u64>,
    request_secs: Option<u64>,
    settle_ms: Option<u64>,
    capture_ms: Option<u64>,
    challenge_secs: Option<u64>,
    render_secs: Option<u64>,
}

impl AppConfig {
    pub fn load(cli: CliOverrides) -> Result<Self, PriceWatchError> {
        let config_dir = dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("pricewatch");
        let default_data_dir = dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from(".local/share"))
            .join("pricewatch");

        let file_config = load_config_file(&config_dir)?;
        Self::resolve(cli, |key| std::env::var(key).ok(), file_config, default_data_dir)
    }

    // Priority: CLI flags → env vars → config file → defaults
    fn resolve(
        cli: CliOverrides,
        env: impl Fn(&str) -> Option<String>,
        file: ConfigFile,
        default_data_dir: PathBuf,
    ) -> Result<Self, PriceWatchError> {
        let browser_path = env("PRICEWATCH_BROWSER_PATH")
            .or(file.defaults.browser_path)
            .map(PathBuf::from);

        let data_dir = cli
            .data_dir
            .or_else(|| env("PRICEWATCH_DATA_DIR").map(PathBuf::from))
            .or_else(|| file.defaults.data_dir.map(PathBuf::from))
            .unwrap_or(default_data_dir);

        let currency = cli
            .currency
            .or_else(|| env("PRICEWATCH_CURRENCY"))
            .or(file.defaults.currency)
            .unwrap_or_else(|| "USD".to_string())
            .to_uppercase();

        let detector_url = env("PRICEWATCH_DETECTOR_URL")
            .or(file.services.detector_url)
            .unwrap_or_else(|| DEFAULT_DETECTOR_URL.to_string());
        let recognizer_url = env("PRICEWATCH_RECOGNIZER_URL")
            .or(file.services.recognizer_url)
            .unwrap_or_else(|| DEFAULT_RECOGNIZER_URL.to_string());

        let defaults = Timeouts::default();
        let t = file.timeouts;
        let timeouts = Timeouts {
            network: t.network_secs.map(Duration::from_secs).unwrap_or(defaults.network),
            vision: t.vision_secs.map(Duration::from_secs).unwrap_or(defaults.vision),
            request: t.request_secs.map(Duration::from_secs).unwrap_or(defaults.request),
            settle: t.settle_ms.map(Duration::from_millis).unwrap_or(defaults.settle),
            capture: t.capture_ms.map(Duration::from_millis).unwrap_or(defaults.capture),
            challenge: t
                .challenge_secs
                .map(Duration::from_secs)
                .unwrap_or(defaults.challenge),
            render: t.render_secs.map(Duration::from_secs).unwrap_or(defaults.render),
        };

        let config = AppConfig {
            debug: cli.debug,
            browser_path,
            data_dir,
            currency,
            detector_url,
            recognizer_url,
            detection_threshold: file.services.detection_threshold.unwrap_or(0.5),
            network_confidence: file.services.network_confidence.unwrap_or(0.8),
            timeouts,
            policy: file.arbitration.unwrap_or_default(),
            preference: file.preference.unwrap_or_default(),
        };
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), PriceWatchError> {
        if self.currency.len() != 3 || !self.currency.chars().all(|c| c.is_ascii_alphabetic()) {
            return Err(PriceWatchError::Config(format!(
                "Currency '{}' is not a three-letter ISO code",
                self.currency
            )));
        }
        for (name, value) in [
            ("detection_threshold", self.detection_threshold),
            ("network_confidence", self.network_confidence),
            ("preference.trust_threshold", self.preference.trust_threshold),
            ("preference.step", self.preference.step),
            ("preference.neutral_rate", self.preference.neutral_rate),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(PriceWatchError::Config(format!(
                    "{} must be between 0 and 1, got {}",
                    name, value
                )));
            }
        }
        for url in [&self.detector_url, &self.recognizer_url] {
            url::Url::parse(url)
                .map_err(|e| PriceWatchError::Config(format!("Invalid service URL {}: {}", url, e)))?;
        }
        Ok(())
    }

    pub fn engine_settings(&self) -> EngineSettings {
        EngineSettings {
            network: NetworkSettings {
                capture_window: self.timeouts.capture,
                default_currency: self.currency.clone(),
                default_confidence: self.network_confidence,
            },
            network_timeout: self.timeouts.network,
            render_timeout: self.timeouts.render,
            vision: VisionSettings {
                detection_threshold: self.detection_threshold,
                timeout: self.timeouts.vision,
                default_currency: self.currency.clone(),
            },
            policy: self.policy.clone(),
            preference: self.preference.clone(),
        }
    }

    pub fn render_settings(&self) -> RenderSettings {
        RenderSettings {
            headed: self.debug,
            settle_delay: self.timeouts.settle,
            challenge_wait: self.timeouts.challenge,
        }
    }
}

fn load_config_file(config_dir: &Path) -> Result<ConfigFile, PriceWatchError> {
    let config_path = config_dir.join("config.toml");
    if !config_path.exists() {
        return Ok(ConfigFile::default());
    }
    let content = std::fs::read_to_string(&config_path)?;
    parse_config(&content).map_err(|e| {
        PriceWatchError::Config(format!("{}: {}", config_path.display(), e))
    })
}

fn parse_config(content: &str) -> Result<ConfigFile, toml::de::Error> {
    toml::from_str(content)
}
