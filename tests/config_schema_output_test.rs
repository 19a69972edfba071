// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-cooler-shaker project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

use anyhow::Result;
use rust_cooler_shaker::config::{self, Config, CONFIG_SCHEMA};

#[test]
fn test_config_schema_output() -> Result<()> {
    // The output goes to stdout; only check that it is produced without error
    config::output_config_schema()?;
    Ok(())
}

#[test]
fn test_schema_accepts_default_config() -> Result<()> {
    let schema: serde_json::Value = serde_json::from_str(CONFIG_SCHEMA)?;
    assert_eq!(
        schema["$schema"],
        "https://json-schema.org/draft/2020-12/schema"
    );

    let document = serde_json::to_value(Config::default())?;
    let validator = jsonschema::draft202012::options()
        .should_validate_formats(true)
        .build(&schema)?;
    assert!(validator.is_valid(&document));
    Ok(())
}
