use anyhow::Result;

fn main() -> Result<()> {
    pylonmon::boot::init_common();
    let matches = pylonmon::cli::parse_args();

    if let Err(err) = pylonmon::cli::actions::run(&matches) {
        log::error!("{err:#}");
        return Err(err);
    }
    Ok(())
}
