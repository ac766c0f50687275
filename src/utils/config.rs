//! Configuration parameters struct parsing helper.

/// Composes a configuration struct from its default values, then overwrites
/// given fields by parsing from given TOML string if it's not `None`. Returns
/// an `Ok(config)` on success, and `Err(CarillonError)` on parser failure.
///
/// Example:
/// ```ignore
/// let config = parsed_config!(config_str => ChordConfig; size_successor_list)?;
/// ```
#[macro_export]
macro_rules! parsed_config {
    ($config_str:expr => $config_type:ty; $($field:ident),+) => {{
        let config_str: Option<&str> = $config_str;

        // closure helper for easier error returning
        let compose_config = || -> Result<$config_type, CarillonError> {
            let mut config: $config_type = Default::default();
            if config_str.is_none() {
                return Ok(config);
            }

            let mut table = config_str.unwrap().parse::<toml::Table>()?;

            // traverse through all given field names
            $({
                // if field name found in table (and removed)
                if let Some(v) = table.remove(stringify!($field)) {
                    config.$field = v.try_into()?;
                }
            })+

            // if table is not empty at this time, some parsed keys are not
            // expected hence invalid
            if !table.is_empty() {
                return Err(CarillonError::msg(format!(
                    "invalid field name '{}' in config",
                    table.keys().next().unwrap(),
                )));
            }

            Ok(config)
        };

        compose_config()
    }};
}

#[cfg(test)]
mod config_tests {
    use crate::utils::CarillonError;

    #[derive(Debug, PartialEq)]
    struct TestConfig {
        tick_ms: u64,
        listen_host: String,
        load_factor: f64,
    }

    impl Default for TestConfig {
        fn default() -> Self {
            TestConfig {
                tick_ms: 1000,
                listen_host: "127.0.0.1".into(),
                load_factor: 0.75,
            }
        }
    }

    #[test]
    fn parse_from_none() -> Result<(), CarillonError> {
        let config =
            parsed_config!(None => TestConfig; tick_ms, listen_host, load_factor)?;
        let ref_config: TestConfig = Default::default();
        assert_eq!(config, ref_config);
        Ok(())
    }

    #[test]
    fn parse_from_partial() -> Result<(), CarillonError> {
        let config_str = Some("listen_host = '0.0.0.0'");
        let config =
            parsed_config!(config_str => TestConfig; listen_host, load_factor)?;
        let ref_config = TestConfig {
            tick_ms: 1000,
            listen_host: "0.0.0.0".into(),
            load_factor: 0.75,
        };
        assert_eq!(config, ref_config);
        Ok(())
    }

    #[test]
    fn parse_invalid_field() {
        let config_str = Some("no_such_knob = 999");
        assert!(parsed_config!(config_str => TestConfig; tick_ms).is_err());
    }
}
