use std::io::Write;
use std::sync::Once;

use chrono::Local;
use env_logger::{Builder, Env};

static INIT: Once = Once::new();

/// Installs the stderr logger. `RUST_LOG` takes precedence over `filter`.
///
/// Only the first call has any effect.
pub fn init(filter: &str) {
    INIT.call_once(|| {
        let result = Builder::from_env(Env::default().default_filter_or(filter))
            .format(|buf, record| {
                writeln!(
                    buf,
                    "{} [{:<5}] {}: {}",
                    Local::now().format("%Y-%m-%d %H:%M:%S%.3f"),
                    record.level(),
                    record.target(),
                    record.args()
                )
            })
            .try_init();

        match result {
            Ok(()) => log::info!("Logging initialized ({})", filter),
            Err(e) => eprintln!("Logger already installed: {}", e),
        }
    });
}
