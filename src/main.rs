use acw_installer::cli::Args;
use acw_installer::install::wizard;
use log::error;

fn main() {
    let args = Args::parse_args();
    acw_installer::logging::init(acw_installer::log_file_for(&args).as_deref());

    let rt = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("FATAL: Failed to create Tokio runtime: {e}");
            std::process::exit(1);
        }
    };
    if let Err(e) = rt.block_on(acw_installer::run(args)) {
        error!("{e:#}");
        wizard::show_failure(&e);
        std::process::exit(1);
    }
}
