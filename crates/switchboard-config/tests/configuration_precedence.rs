//! Behavioural coverage for layered configuration loading.

use std::cell::RefCell;
use std::ffi::OsString;
use std::fs;
use std::sync::{Mutex, MutexGuard, PoisonError};

use once_cell::sync::Lazy;
use ortho_config::OrthoConfig as _;
use rstest::fixture;
use rstest_bdd_macros::{given, scenario, then, when};
use tempfile::TempDir;

use switchboard_config::{
    Config, DEFAULT_EXECUTION_TIMEOUT_MS, ReplayStrategy, default_log_filter, default_log_format,
    default_replay_strategy,
};

static ENV_MUTEX: Lazy<Mutex<()>> = Lazy::new(|| Mutex::new(()));

struct Harness {
    temp_dir: TempDir,
    cli_args: RefCell<Vec<OsString>>,
    env_overrides: RefCell<Vec<(String, Option<OsString>)>>,
    loaded: RefCell<Option<Config>>,
    error: RefCell<Option<String>>,
    _env_guard: MutexGuard<'static, ()>,
}

impl Harness {
    fn new() -> Self {
        let env_guard = ENV_MUTEX.lock().unwrap_or_else(PoisonError::into_inner);
        let temp_dir = match TempDir::new() {
            Ok(dir) => dir,
            Err(error) => panic!("failed to create temporary directory: {error}"),
        };
        Self {
            temp_dir,
            cli_args: RefCell::new(vec![OsString::from("switchboard")]),
            env_overrides: RefCell::new(Vec::new()),
            loaded: RefCell::new(None),
            error: RefCell::new(None),
            _env_guard: env_guard,
        }
    }

    fn write_config(&self, contents: &str) {
        let path = self.temp_dir.path().join("switchboard.toml");
        if let Err(error) = fs::write(&path, contents) {
            panic!("failed to write configuration: {error}");
        }
        let mut args = self.cli_args.borrow_mut();
        args.push(OsString::from("--config-path"));
        args.push(path.into_os_string());
    }

    fn set_env(&self, key: &str, value: &str) {
        let previous = std::env::var_os(key);
        // Environment mutation is `unsafe` on edition 2024. Overrides are
        // serialised by `ENV_MUTEX` and restored in `Drop`.
        unsafe { std::env::set_var(key, value) };
        self.env_overrides
            .borrow_mut()
            .push((key.to_owned(), previous));
    }

    fn push_cli_arg(&self, arg: impl Into<OsString>) {
        self.cli_args.borrow_mut().push(arg.into());
    }

    fn load(&self) {
        if self.loaded.borrow().is_some() || self.error.borrow().is_some() {
            return;
        }
        let args = self.cli_args.borrow().clone();
        match Config::load_from_iter(args) {
            Ok(config) => *self.loaded.borrow_mut() = Some(config),
            Err(error) => *self.error.borrow_mut() = Some(error.to_string()),
        }
    }

    fn config(&self) -> Config {
        self.load();
        if let Some(error) = self.error.borrow().as_ref() {
            panic!("configuration failed to load: {error}");
        }
        match self.loaded.borrow().as_ref() {
            Some(config) => config.clone(),
            None => panic!("configuration was not loaded"),
        }
    }
}

impl Drop for Harness {
    fn drop(&mut self) {
        let mut overrides = self.env_overrides.borrow_mut();
        while let Some((key, value)) = overrides.pop() {
            if let Some(os_value) = value {
                unsafe { std::env::set_var(&key, os_value) };
            } else {
                unsafe { std::env::remove_var(&key) };
            }
        }
    }
}

fn parse_millis(raw: &str) -> u64 {
    match raw.trim_matches('"').parse::<u64>() {
        Ok(value) => value,
        Err(error) => panic!("invalid millisecond value '{raw}': {error}"),
    }
}

#[fixture]
fn harness() -> Harness {
    Harness::new()
}

#[given("a configuration file setting the execution timeout to \"{millis}\"")]
fn given_configuration_file(harness: &Harness, millis: String) {
    let value = parse_millis(&millis);
    harness.write_config(&format!("execution_timeout_ms = {value}\n"));
}

#[given("the environment overrides the execution timeout to \"{millis}\"")]
fn given_environment_timeout(harness: &Harness, millis: String) {
    harness.set_env("SWITCHBOARD_EXECUTION_TIMEOUT_MS", millis.trim_matches('"'));
}

#[given("the environment overrides the replay strategy to \"{strategy}\"")]
fn given_environment_strategy(harness: &Harness, strategy: String) {
    harness.set_env("SWITCHBOARD_REPLAY_STRATEGY", strategy.trim_matches('"'));
}

#[when("the CLI sets the execution timeout to \"{millis}\"")]
fn when_cli_override(harness: &Harness, millis: String) {
    harness.push_cli_arg("--execution-timeout-ms");
    harness.push_cli_arg(millis.trim_matches('"'));
}

#[when("the configuration loads without overrides")]
fn when_load_without_overrides(harness: &Harness) {
    harness.load();
}

#[then("loading the configuration resolves the execution timeout to \"{millis}\"")]
fn then_resolved_timeout(harness: &Harness, millis: String) {
    assert_eq!(harness.config().execution_timeout_ms(), parse_millis(&millis));
}

#[then("loading the configuration resolves the replay strategy to \"{strategy}\"")]
fn then_resolved_strategy(harness: &Harness, strategy: String) {
    let expected = match strategy.trim_matches('"').parse::<ReplayStrategy>() {
        Ok(value) => value,
        Err(error) => panic!("invalid strategy '{strategy}': {error}"),
    };
    assert_eq!(harness.config().replay_strategy(), expected);
}

#[then("loading the configuration applies the built-in defaults")]
fn then_defaults_applied(harness: &Harness) {
    let config = harness.config();
    assert_eq!(config.log_filter(), default_log_filter());
    assert_eq!(config.log_format(), default_log_format());
    assert_eq!(config.execution_timeout_ms(), DEFAULT_EXECUTION_TIMEOUT_MS);
    assert_eq!(config.replay_strategy(), default_replay_strategy());
    assert_eq!(config.replay_capacity(), None);
    assert!(config.validate().is_ok());
}

#[scenario(path = "tests/features/configuration_precedence.feature")]
fn configuration_precedence(#[from(harness)] harness: Harness) {
    let _ = harness;
}
