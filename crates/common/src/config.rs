use std::env;
use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("{key} has invalid value {value:?}: {reason}")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },
    #[error("{0} must be set")]
    Missing(&'static str),
}

/// How stakes grow with confidence and with progress toward the daily target.
///
/// `stake = round2(base * progress * (confidence_floor + confidence_gain * c))`,
/// capped at `balance * risk_fraction`. `base = max(base_stake, target * target_base_fraction)`.
/// While daily profit is positive, `progress = min(progress_offset +
/// max(progress_floor, profit / target) * progress_gain, multiplier_cap)`.
#[derive(Debug, Clone, PartialEq)]
pub struct StakePolicy {
    pub base_stake: f64,
    pub target_base_fraction: f64,
    pub confidence_floor: f64,
    pub confidence_gain: f64,
    pub progress_offset: f64,
    pub progress_floor: f64,
    pub progress_gain: f64,
    pub multiplier_cap: f64,
    pub risk_fraction: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Profile {
    Aggressive,
    Balanced,
}

impl FromStr for Profile {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "aggressive" => Ok(Self::Aggressive),
            "balanced" => Ok(Self::Balanced),
            other => Err(format!("unknown profile {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CounterpartyKind {
    Paper,
    Deriv,
}

impl FromStr for CounterpartyKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "paper" => Ok(Self::Paper),
            "deriv" => Ok(Self::Deriv),
            other => Err(format!("unknown counterparty {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OracleKind {
    /// Confidence-derived outcome. Not market data; replace for real use.
    Placeholder,
    Counterparty,
}

impl FromStr for OracleKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "placeholder" => Ok(Self::Placeholder),
            "counterparty" => Ok(Self::Counterparty),
            other => Err(format!("unknown oracle {other}")),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AccountConfig {
    pub initial_balance: f64,
    pub daily_target_pct: f64,
    pub max_daily_trades: u32,
    pub min_confidence: f64,
    pub rebase_target_on_settlement: bool,
    pub auto_trade: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DispatchConfig {
    pub rate_limit_count: usize,
    pub rate_limit_window: Duration,
    pub rate_check_interval: Duration,
    pub max_queue_age: Duration,
    pub max_signals_per_cycle: usize,
    pub dedup_signals: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionConfig {
    pub step_timeout: Duration,
    pub contract_duration: u32,
    pub contract_duration_unit: String,
    pub currency: String,
    pub connections: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SettlementConfig {
    pub payout_factor: f64,
    pub position_duration: Duration,
    pub countdown_interval: Duration,
    pub retries: u32,
    pub retry_base: Duration,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ScanConfig {
    pub interval: Duration,
    pub idle_interval: Duration,
    pub source_concurrency: usize,
    pub sources_path: String,
}

#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub profile: Profile,
    pub account: AccountConfig,
    pub stake: StakePolicy,
    pub dispatch: DispatchConfig,
    pub execution: ExecutionConfig,
    pub settlement: SettlementConfig,
    pub scan: ScanConfig,
    pub counterparty: CounterpartyKind,
    pub oracle: OracleKind,
    pub database_path: String,
    pub deriv_ws_url: String,
    pub deriv_token: Option<String>,
    pub telegram_token: Option<String>,
    pub telegram_chat_id: Option<i64>,
}

impl EngineConfig {
    pub fn for_profile(profile: Profile) -> Self {
        let (stake, payout_factor, position_secs, ticks, max_trades, step_secs) = match profile {
            Profile::Aggressive => (
                StakePolicy {
                    base_stake: 20.0,
                    target_base_fraction: 0.0,
                    confidence_floor: 0.7,
                    confidence_gain: 0.5,
                    progress_offset: 1.0,
                    progress_floor: 0.0,
                    progress_gain: 2.0,
                    multiplier_cap: 3.0,
                    risk_fraction: 0.05,
                },
                0.85,
                180,
                3,
                50,
                8,
            ),
            Profile::Balanced => (
                StakePolicy {
                    base_stake: 20.0,
                    target_base_fraction: 0.25,
                    confidence_floor: 0.6,
                    confidence_gain: 0.4,
                    progress_offset: 0.0,
                    progress_floor: 0.5,
                    progress_gain: 1.5,
                    multiplier_cap: 2.0,
                    risk_fraction: 0.03,
                },
                0.82,
                300,
                5,
                50,
                10,
            ),
        };

        Self {
            profile,
            account: AccountConfig {
                initial_balance: 1000.0,
                daily_target_pct: 0.25,
                max_daily_trades: max_trades,
                min_confidence: 0.70,
                rebase_target_on_settlement: false,
                auto_trade: true,
            },
            stake,
            dispatch: DispatchConfig {
                rate_limit_count: 2,
                rate_limit_window: Duration::from_secs(1),
                rate_check_interval: Duration::from_millis(100),
                max_queue_age: Duration::from_secs(30),
                max_signals_per_cycle: 8,
                dedup_signals: true,
            },
            execution: ExecutionConfig {
                step_timeout: Duration::from_secs(step_secs),
                contract_duration: ticks,
                contract_duration_unit: "t".to_string(),
                currency: "USD".to_string(),
                connections: 2,
            },
            settlement: SettlementConfig {
                payout_factor,
                position_duration: Duration::from_secs(position_secs),
                countdown_interval: Duration::from_secs(15),
                retries: 5,
                retry_base: Duration::from_secs(2),
            },
            scan: ScanConfig {
                interval: Duration::from_secs(10),
                idle_interval: Duration::from_secs(60),
                source_concurrency: 6,
                sources_path: "config/sources.json".to_string(),
            },
            counterparty: CounterpartyKind::Paper,
            oracle: OracleKind::Placeholder,
            database_path: "data/dispatch.db".to_string(),
            deriv_ws_url: "wss://ws.derivws.com/websockets/v3?app_id=1089".to_string(),
            deriv_token: None,
            telegram_token: None,
            telegram_chat_id: None,
        }
    }

    /// Builds the config from the process environment on top of the
    /// selected profile's defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let vars = Vars { lookup: &lookup };
        let profile = vars.parse("ENGINE_PROFILE")?.unwrap_or(Profile::Aggressive);
        let mut cfg = Self::for_profile(profile);

        vars.set(&mut cfg.account.initial_balance, "INITIAL_BALANCE")?;
        vars.set(&mut cfg.account.daily_target_pct, "DAILY_TARGET_PCT")?;
        vars.set(&mut cfg.account.max_daily_trades, "MAX_DAILY_TRADES")?;
        vars.set(&mut cfg.account.min_confidence, "MIN_CONFIDENCE")?;
        vars.set(
            &mut cfg.account.rebase_target_on_settlement,
            "REBASE_TARGET_ON_SETTLEMENT",
        )?;
        vars.set(&mut cfg.account.auto_trade, "AUTO_TRADE")?;
        vars.set(&mut cfg.stake.base_stake, "BASE_STAKE")?;
        vars.set(&mut cfg.stake.risk_fraction, "RISK_FRACTION")?;

        vars.set(&mut cfg.dispatch.rate_limit_count, "RATE_LIMIT_COUNT")?;
        vars.set_millis(&mut cfg.dispatch.rate_limit_window, "RATE_LIMIT_WINDOW_MS")?;
        vars.set_secs(&mut cfg.dispatch.max_queue_age, "MAX_QUEUE_AGE_SECS")?;
        vars.set(&mut cfg.dispatch.max_signals_per_cycle, "MAX_SIGNALS_PER_CYCLE")?;
        vars.set(&mut cfg.dispatch.dedup_signals, "DEDUP_SIGNALS")?;

        vars.set_secs(&mut cfg.execution.step_timeout, "STEP_TIMEOUT_SECS")?;
        vars.set(&mut cfg.execution.contract_duration, "CONTRACT_DURATION")?;
        vars.set(&mut cfg.execution.contract_duration_unit, "CONTRACT_DURATION_UNIT")?;
        vars.set(&mut cfg.execution.currency, "CURRENCY")?;
        vars.set(&mut cfg.execution.connections, "COUNTERPARTY_CONNECTIONS")?;

        vars.set(&mut cfg.settlement.payout_factor, "PAYOUT_FACTOR")?;
        vars.set_secs(&mut cfg.settlement.position_duration, "POSITION_DURATION_SECS")?;
        vars.set_secs(&mut cfg.settlement.countdown_interval, "COUNTDOWN_INTERVAL_SECS")?;
        vars.set(&mut cfg.settlement.retries, "SETTLEMENT_RETRIES")?;

        vars.set_secs(&mut cfg.scan.interval, "SCAN_INTERVAL_SECS")?;
        vars.set(&mut cfg.scan.source_concurrency, "SOURCE_CONCURRENCY")?;
        vars.set(&mut cfg.scan.sources_path, "SIGNAL_SOURCES")?;

        vars.set(&mut cfg.counterparty, "COUNTERPARTY")?;
        vars.set(&mut cfg.oracle, "ORACLE")?;
        vars.set(&mut cfg.database_path, "DATABASE_PATH")?;
        vars.set(&mut cfg.deriv_ws_url, "DERIV_WS_URL")?;
        cfg.deriv_token = lookup("DERIV_TOKEN").filter(|t| !t.is_empty());
        cfg.telegram_token = lookup("TELEGRAM_BOT_TOKEN").filter(|t| !t.is_empty());
        cfg.telegram_chat_id = vars.parse("TELEGRAM_CHAT_ID")?;

        cfg.validate()?;
        Ok(cfg)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        fn check(key: &'static str, value: f64, ok: bool, reason: &str) -> Result<(), ConfigError> {
            if ok {
                Ok(())
            } else {
                Err(ConfigError::Invalid {
                    key,
                    value: value.to_string(),
                    reason: reason.to_string(),
                })
            }
        }

        let a = &self.account;
        check(
            "INITIAL_BALANCE",
            a.initial_balance,
            a.initial_balance.is_finite() && a.initial_balance >= 0.0,
            "must be a non-negative amount",
        )?;
        check(
            "MIN_CONFIDENCE",
            a.min_confidence,
            (0.0..=1.0).contains(&a.min_confidence),
            "must be within [0, 1]",
        )?;
        check(
            "DAILY_TARGET_PCT",
            a.daily_target_pct,
            a.daily_target_pct.is_finite() && a.daily_target_pct > 0.0,
            "must be positive",
        )?;
        check(
            "BASE_STAKE",
            self.stake.base_stake,
            self.stake.base_stake.is_finite() && self.stake.base_stake > 0.0,
            "must be a positive amount",
        )?;
        check(
            "RISK_FRACTION",
            self.stake.risk_fraction,
            (0.0..=1.0).contains(&self.stake.risk_fraction),
            "must be within [0, 1]",
        )?;
        check(
            "RATE_LIMIT_COUNT",
            self.dispatch.rate_limit_count as f64,
            self.dispatch.rate_limit_count > 0,
            "must allow at least one execution per window",
        )?;
        check(
            "COUNTERPARTY_CONNECTIONS",
            self.execution.connections as f64,
            self.execution.connections > 0,
            "must be at least one",
        )?;
        let st = &self.settlement;
        check(
            "PAYOUT_FACTOR",
            st.payout_factor,
            st.payout_factor.is_finite() && st.payout_factor >= 0.0,
            "must be a non-negative factor",
        )?;
        check(
            "POSITION_DURATION_SECS",
            st.position_duration.as_secs_f64(),
            !st.position_duration.is_zero(),
            "must be positive",
        )?;
        check(
            "COUNTDOWN_INTERVAL_SECS",
            st.countdown_interval.as_secs_f64(),
            !st.countdown_interval.is_zero(),
            "must be positive",
        )?;
        if self.counterparty == CounterpartyKind::Deriv && self.deriv_token.is_none() {
            return Err(ConfigError::Missing("DERIV_TOKEN"));
        }
        Ok(())
    }
}

struct Vars<'a, F: Fn(&str) -> Option<String>> {
    lookup: &'a F,
}

impl<F: Fn(&str) -> Option<String>> Vars<'_, F> {
    fn parse<T>(&self, key: &'static str) -> Result<Option<T>, ConfigError>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        match (self.lookup)(key) {
            None => Ok(None),
            Some(raw) if raw.trim().is_empty() => Ok(None),
            Some(raw) => raw
                .trim()
                .parse::<T>()
                .map(Some)
                .map_err(|e| ConfigError::Invalid {
                    key,
                    value: raw.clone(),
                    reason: e.to_string(),
                }),
        }
    }

    fn set<T>(&self, slot: &mut T, key: &'static str) -> Result<(), ConfigError>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        if let Some(v) = self.parse(key)? {
            *slot = v;
        }
        Ok(())
    }

    fn set_secs(&self, slot: &mut Duration, key: &'static str) -> Result<(), ConfigError> {
        if let Some(secs) = self.parse::<u64>(key)? {
            *slot = Duration::from_secs(secs);
        }
        Ok(())
    }

    fn set_millis(&self, slot: &mut Duration, key: &'static str) -> Result<(), ConfigError> {
        if let Some(ms) = self.parse::<u64>(key)? {
            *slot = Duration::from_millis(ms);
        }
        Ok(())
    }
}
