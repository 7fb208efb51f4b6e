use tracing_subscriber::{
    filter::{Directive, LevelFilter},
    fmt::{format, time::ChronoLocal},
    EnvFilter,
};

/// Install the global subscriber. `directive` raises the level of the calling
/// binary's own target, everything else defaults to `info` unless `RUST_LOG`
/// says otherwise.
pub fn init_log(directive: &str) {
    let format = format::format()
        .with_level(true)
        .with_target(false)
        .with_timer(ChronoLocal::new("[%m-%d %H:%M:%S%.3f]".to_string()))
        .compact();

    let mut env_filter = EnvFilter::from_default_env().add_directive(LevelFilter::INFO.into());
    match directive.parse::<Directive>() {
        Ok(directive) => env_filter = env_filter.add_directive(directive),
        Err(err) => eprintln!("ignoring log directive `{directive}`: {err}"),
    }

    tracing_subscriber::fmt().with_env_filter(env_filter).event_format(format).init();
}
