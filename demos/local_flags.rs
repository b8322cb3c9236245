use serde_json::{json, Map, Value};

use mixpanel_flags::{FlagContext, LocalFlagsConfig};

pub fn main() -> mixpanel_flags::Result<()> {
    env_logger::init();

    let token = std::env::var("MIXPANEL_TOKEN").unwrap();
    let provider = LocalFlagsConfig::from_token(token)
        .exposure_tracker(
            |distinct_id: &str, event_name: &str, properties: Map<String, Value>| {
                println!("{event_name} for {distinct_id}: {properties:?}");
            },
        )
        .to_provider()?;

    // Fetch definitions and start a poller thread to keep them fresh. Until this call returns,
    // the provider returns fallback values for all flags.
    provider.start_polling_for_definitions()?;

    let context: FlagContext = serde_json::from_value(json!({
        "distinct_id": "user-123",
        "custom_properties": {
            "plan": "premium",
            "country": "US"
        }
    }))
    .unwrap();

    let value = provider.get_variant_value("new-feature", "default-value", &context);
    println!("Variant value: {value}");

    provider.stop_polling_for_definitions()
}
