use flexi_logger::{Duplicate, FileSpec, Logger, LoggerHandle};
use gmonitor::cinfo;
use gmonitor::param::{self, Param};
use gmonitor::{run, version};
use log::{error, info, warn};
use signal_hook::consts::{SIGINT, SIGTERM};
use signal_hook::iterator::Signals;
use std::error::Error;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

fn start_logger(param: &Param) -> Result<LoggerHandle, Box<dyn Error>> {
    let logger = Logger::try_with_env_or_str(&param.general.log_level)?;
    let handle = if param.general.log_base.is_empty() {
        logger.start()?
    } else {
        logger
            .log_to_file(
                FileSpec::default()
                    .basename(&param.general.log_base)
                    .suffix(&param.general.log_suffix),
            )
            .duplicate_to_stderr(Duplicate::Info)
            .start()?
    };
    Ok(handle)
}

// Clears `running` on SIGINT/SIGTERM so the current run stops with its best selection.
fn watch_signals(running: Arc<AtomicBool>) -> Result<(), Box<dyn Error>> {
    let mut signals = Signals::new([SIGINT, SIGTERM])?;
    thread::spawn(move || {
        for signal in signals.forever() {
            warn!("Signal {} received: finishing current run...", signal);
            running.store(false, Ordering::Relaxed);
        }
    });
    Ok(())
}

fn main() -> Result<(), Box<dyn Error>> {
    let param_file = std::env::args().nth(1).unwrap_or_else(|| "param.yaml".to_string());
    let param = param::get(param_file.clone()).map_err(|e| {
        eprintln!("Cannot use parameter file {}: {}", param_file, e);
        e
    })?;

    let _logger = start_logger(&param)?;
    info!("gmonitor {} with parameters from {}", version(), param.tag);

    rayon::ThreadPoolBuilder::new()
        .num_threads(param.general.thread_number)
        .build_global()?;

    let running = Arc::new(AtomicBool::new(true));
    watch_signals(Arc::clone(&running))?;

    let experiment = match run(&param, running) {
        Ok(experiment) => experiment,
        Err(e) => {
            error!("Run aborted: {}", e);
            return Err(e);
        }
    };

    cinfo!(param.general.display_colorful, "{}", experiment.display_results());

    if !param.general.output_dir.is_empty() {
        experiment.export_outputs(&param.general.output_dir)?;
    }
    if !param.general.save_exp.is_empty() {
        experiment.save_auto(&param.general.save_exp)?;
        info!("Experiment saved to {}", param.general.save_exp);
    }

    Ok(())
}
