use std::path::Path;

use mousedamper_lib::config::{ConfigManager, APP_DEFAULT_CONFIG_FILE};
use mousedamper_lib::schemas::FilterConfig;
use pretty_assertions::assert_eq;

#[test]
fn test_shipped_config_is_valid_and_default() {
    let path = Path::new(env!("CARGO_MANIFEST_DIR")).join(APP_DEFAULT_CONFIG_FILE);
    let mut manager = ConfigManager::new(&path, false);
    manager.load().unwrap();
    assert_eq!(manager.validate(), Vec::<String>::new());
    assert_eq!(manager.resolve(false).unwrap(), FilterConfig::default());
    assert!(manager.get_settings().device_name_regex.is_none());
}
