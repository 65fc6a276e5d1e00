//! Strategy tuning: a JSONC file of policy parameters, hot-reloaded between
//! ticks as one whole snapshot.
//!
//! Every key has a default, so an empty file (or no file) is a valid
//! configuration. A reload that fails to parse or validate keeps the
//! previous snapshot.

use crate::domain::{Decimal, MakerOffset};
use crate::signals::{MomentumGate, SignalParams};
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use thiserror::Error;
use tracing::{info, warn};

#[derive(Debug, Error)]
pub enum TuningError {
    #[error("Failed to read tuning file {path}: {message}")]
    Io { path: String, message: String },
    #[error("Failed to parse tuning file: {0}")]
    Parse(String),
    #[error("Invalid tuning value for {0}: {1}")]
    Invalid(String, String),
}

/// Named risk levels that scale grid and trend notionals.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskProfile {
    Light,
    #[default]
    Balanced,
    Aggressive,
}

impl RiskProfile {
    pub fn scale(&self) -> Decimal {
        Decimal::new(match self {
            RiskProfile::Light => dec!(0.5),
            RiskProfile::Balanced => dec!(1.0),
            RiskProfile::Aggressive => dec!(1.5),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Tuning {
    // Ladder shape
    pub grid_step_usd: Decimal,
    pub grid_levels_per_side: u32,
    pub post_only: bool,
    pub maker_offset_ticks: u32,

    // Ladder repair
    pub repost_ttl_sec: i64,
    pub max_reposts_per_window: u32,
    pub far_steps: u32,
    pub flat_edge_window_sec: i64,
    pub flat_edge_resets_repost_window: bool,
    pub rebuild_cooldown_sec: i64,

    // Sizing
    pub target_notional_usd_long: Decimal,
    pub target_notional_usd_short: Decimal,
    pub risk_profile: RiskProfile,
    /// Overrides the profile scale when set.
    pub risk_scale_grid: Option<Decimal>,
    pub risk_scale_trend: Option<Decimal>,

    // Trend adds
    pub trend_notional_usd: Decimal,
    /// 0 = unlimited.
    pub trend_daily_cap: u32,
    pub trend_cooldown_sec: i64,
    /// 0 = unlimited.
    pub trend_max_notional_usd: Decimal,
    pub trend_min_distance_pct: Decimal,
    pub trend_momentum_alpha: f64,
    pub trend_momentum_window: usize,
    pub trend_require_two_bars: bool,
    pub trend_require_profit: bool,

    // Take profit
    pub tp_base_usd: Decimal,
    pub tp_partial_ratio: Decimal,
    pub tp_trail_usd: Decimal,
    pub tp_trail_pct: Decimal,

    // DCA
    pub dca_enable: bool,
    pub dca_min_pct: Decimal,
    pub dca_max_pct: Decimal,
    pub dca_fixed_notional_usd: Decimal,
    pub dca_total_cap: u32,
    pub dca_momentum_alpha: f64,
    pub dca_momentum_window: usize,
    pub dca_require_two_bars: bool,

    // Risk guard (margin thresholds in basis points)
    pub margin_stop_pct: Decimal,
    pub margin_resume_pct: Decimal,
    pub margin_check_sec: i64,
    pub liqpx_stop_usd: Decimal,
    pub liqpx_resume_usd: Decimal,

    // Cadence
    pub candle_limit: usize,
    pub signal_refresh_sec: i64,
    pub tick_refresh_sec: u64,
    pub shutdown_cancel_sweeps: u32,
    /// Grid health summary log interval; 0 disables it.
    pub log_summary_every_sec: i64,
}

impl Default for Tuning {
    fn default() -> Self {
        Self {
            grid_step_usd: Decimal::new(dec!(15)),
            grid_levels_per_side: 10,
            post_only: true,
            maker_offset_ticks: 1,

            repost_ttl_sec: 1800,
            max_reposts_per_window: 5,
            far_steps: 5,
            flat_edge_window_sec: 60,
            flat_edge_resets_repost_window: false,
            rebuild_cooldown_sec: 12,

            target_notional_usd_long: Decimal::new(dec!(50)),
            target_notional_usd_short: Decimal::new(dec!(50)),
            risk_profile: RiskProfile::Balanced,
            risk_scale_grid: None,
            risk_scale_trend: None,

            trend_notional_usd: Decimal::new(dec!(8)),
            trend_daily_cap: 5,
            trend_cooldown_sec: 180,
            trend_max_notional_usd: Decimal::zero(),
            trend_min_distance_pct: Decimal::new(dec!(0.008)),
            trend_momentum_alpha: 1.2,
            trend_momentum_window: 20,
            trend_require_two_bars: true,
            trend_require_profit: true,

            tp_base_usd: Decimal::new(dec!(0.5)),
            tp_partial_ratio: Decimal::new(dec!(0.3)),
            tp_trail_usd: Decimal::new(dec!(0.5)),
            tp_trail_pct: Decimal::new(dec!(0.007)),

            dca_enable: true,
            dca_min_pct: Decimal::new(dec!(0.08)),
            dca_max_pct: Decimal::new(dec!(0.24)),
            dca_fixed_notional_usd: Decimal::new(dec!(8)),
            dca_total_cap: 4,
            dca_momentum_alpha: 1.2,
            dca_momentum_window: 20,
            dca_require_two_bars: true,

            margin_stop_pct: Decimal::new(dec!(1000)),
            margin_resume_pct: Decimal::new(dec!(1200)),
            margin_check_sec: 5,
            liqpx_stop_usd: Decimal::new(dec!(80)),
            liqpx_resume_usd: Decimal::new(dec!(140)),

            candle_limit: 300,
            signal_refresh_sec: 30,
            tick_refresh_sec: 3,
            shutdown_cancel_sweeps: 5,
            log_summary_every_sec: 60,
        }
    }
}

impl Tuning {
    /// Parse JSONC text and validate it.
    pub fn from_jsonc(text: &str) -> Result<Self, TuningError> {
        let stripped = strip_jsonc_comments(text);
        if stripped.trim().is_empty() {
            return Ok(Self::default());
        }
        let tuning: Tuning =
            serde_json::from_str(&stripped).map_err(|e| TuningError::Parse(e.to_string()))?;
        tuning.validate()?;
        Ok(tuning)
    }

    pub fn validate(&self) -> Result<(), TuningError> {
        fn invalid(key: &str, msg: &str) -> TuningError {
            TuningError::Invalid(key.to_string(), msg.to_string())
        }

        if !self.grid_step_usd.is_positive() {
            return Err(invalid("grid_step_usd", "must be positive"));
        }
        if self.grid_levels_per_side == 0 {
            return Err(invalid("grid_levels_per_side", "must be at least 1"));
        }
        if self.repost_ttl_sec <= 0 {
            return Err(invalid("repost_ttl_sec", "must be positive"));
        }
        if self.max_reposts_per_window == 0 {
            return Err(invalid("max_reposts_per_window", "must be at least 1"));
        }
        if self.far_steps == 0 {
            return Err(invalid("far_steps", "must be at least 1"));
        }
        if self.margin_resume_pct < self.margin_stop_pct {
            return Err(invalid(
                "margin_resume_pct",
                "must be greater than or equal to margin_stop_pct",
            ));
        }
        if self.liqpx_resume_usd < self.liqpx_stop_usd {
            return Err(invalid(
                "liqpx_resume_usd",
                "must be greater than or equal to liqpx_stop_usd",
            ));
        }
        if self.dca_min_pct > self.dca_max_pct {
            return Err(invalid("dca_min_pct", "must not exceed dca_max_pct"));
        }
        if !self.tp_partial_ratio.is_positive() || self.tp_partial_ratio > Decimal::one() {
            return Err(invalid("tp_partial_ratio", "must be in (0, 1]"));
        }
        for (key, scale) in [
            ("risk_scale_grid", self.risk_scale_grid),
            ("risk_scale_trend", self.risk_scale_trend),
        ] {
            if scale.is_some_and(|s| s.is_negative()) {
                return Err(invalid(key, "must not be negative"));
            }
        }
        if self.tick_refresh_sec == 0 {
            return Err(invalid("tick_refresh_sec", "must be positive"));
        }
        if self.log_summary_every_sec < 0 {
            return Err(invalid("log_summary_every_sec", "must not be negative"));
        }
        Ok(())
    }

    /// Step or level count differ, which invalidates the current ladder.
    pub fn ladder_shape_changed(&self, previous: &Tuning) -> bool {
        self.grid_step_usd != previous.grid_step_usd
            || self.grid_levels_per_side != previous.grid_levels_per_side
    }

    pub fn maker(&self) -> MakerOffset {
        MakerOffset {
            post_only: self.post_only,
            offset_ticks: self.maker_offset_ticks,
        }
    }

    pub fn grid_scale(&self) -> Decimal {
        self.risk_scale_grid
            .unwrap_or_else(|| self.risk_profile.scale())
    }

    pub fn trend_scale(&self) -> Decimal {
        self.risk_scale_trend
            .unwrap_or_else(|| self.risk_profile.scale())
    }

    pub fn signal_params(&self) -> SignalParams {
        SignalParams {
            candle_limit: self.candle_limit,
            trend: MomentumGate {
                alpha: self.trend_momentum_alpha,
                window: self.trend_momentum_window,
                require_two_bars: self.trend_require_two_bars,
            },
            dca: MomentumGate {
                alpha: self.dca_momentum_alpha,
                window: self.dca_momentum_window,
                require_two_bars: self.dca_require_two_bars,
            },
        }
    }
}

/// Remove `//` line comments and `/* */` block comments outside string
/// literals.
pub fn strip_jsonc_comments(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars().peekable();
    let mut in_string = false;

    while let Some(c) = chars.next() {
        if in_string {
            out.push(c);
            match c {
                '\\' => {
                    if let Some(escaped) = chars.next() {
                        out.push(escaped);
                    }
                }
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match (c, chars.peek()) {
            ('"', _) => {
                in_string = true;
                out.push(c);
            }
            ('/', Some('/')) => {
                for next in chars.by_ref() {
                    if next == '\n' {
                        out.push('\n');
                        break;
                    }
                }
            }
            ('/', Some('*')) => {
                chars.next();
                let mut prev = '\0';
                for next in chars.by_ref() {
                    if prev == '*' && next == '/' {
                        break;
                    }
                    prev = next;
                }
                out.push(' ');
            }
            _ => out.push(c),
        }
    }
    out
}

/// Tuning file with modification-time based reload.
#[derive(Debug)]
pub struct TuningFile {
    path: PathBuf,
    last_modified: Option<SystemTime>,
}

impl TuningFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            last_modified: None,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Initial load. A missing file yields the defaults; an unreadable or
    /// invalid one is an error.
    pub fn load(&mut self) -> Result<Tuning, TuningError> {
        if !self.path.exists() {
            warn!(path = %self.path.display(), "Tuning file not found, using defaults");
            return Ok(Tuning::default());
        }
        self.last_modified = self.modified();
        let tuning = self.read()?;
        info!(path = %self.path.display(), "Loaded tuning file");
        Ok(tuning)
    }

    /// Reload if the file changed since the last successful read or attempt.
    /// Returns `None` when unchanged.
    pub fn poll(&mut self) -> Option<Result<Tuning, TuningError>> {
        let modified = self.modified()?;
        if self.last_modified == Some(modified) {
            return None;
        }
        self.last_modified = Some(modified);
        Some(self.read())
    }

    fn modified(&self) -> Option<SystemTime> {
        std::fs::metadata(&self.path).and_then(|m| m.modified()).ok()
    }

    fn read(&self) -> Result<Tuning, TuningError> {
        let text = std::fs::read_to_string(&self.path).map_err(|e| TuningError::Io {
            path: self.path.display().to_string(),
            message: e.to_string(),
        })?;
        Tuning::from_jsonc(&text)
    }
}
