//! `zigbridge check`: validate settings without connecting anywhere.

use zigbridge_config::Settings;
use zigbridge_core::{CoreError, DecoderChain, DecoderRegistry};

use crate::error::CliError;
use crate::output;

pub fn handle(settings: &Settings) -> Result<(), CliError> {
    let config = settings.to_bridge_config()?;

    let chain = DecoderChain::empty();
    chain
        .rebuild(&DecoderRegistry::with_builtins(), &config.decoders)
        .map_err(CoreError::from)?;

    let decoders = if chain.is_empty() {
        "(none, decoding disabled)".to_owned()
    } else {
        chain.names().join(" → ")
    };
    let stream = match config.stream {
        Some(ref s) => s
            .url
            .as_ref()
            .map_or_else(|| "discover from gateway".to_owned(), ToString::to_string),
        None => "disabled".to_owned(),
    };
    let events: Vec<String> = config
        .rules
        .events
        .iter()
        .map(|r| format!("{}→{}", r.field, r.event))
        .collect();

    let summary = [
        format!("gateway:   {}", config.gateway.url),
        format!("classes:   {}", config.gateway.resource_classes.join(", ")),
        format!("stream:    {stream}"),
        format!(
            "output:    {}*{}",
            config.output_prefix,
            if config.debug { " (preview only)" } else { "" }
        ),
        format!("decoders:  {decoders}"),
        format!("events:    {}", events.join(", ")),
    ];

    output::print_output(&settings.to_redacted_toml()?);
    output::print_output(&summary.join("\n"));
    output::print_output("settings OK");
    Ok(())
}
