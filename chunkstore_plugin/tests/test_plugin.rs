#![allow(missing_docs)]

use chunkstore_plugin::{Plugin, PluginCreateError};

struct TestPlugin;

// The input can be arbitrary, usually a JSON object.
enum Input {
    Accept,
    Reject,
}

fn create_test(input: &Input) -> Result<TestPlugin, PluginCreateError> {
    match input {
        Input::Accept => Ok(TestPlugin),
        Input::Reject => Err(PluginCreateError::from("rejected".to_string())),
    }
}

#[test]
fn plugin() {
    let plugin = Plugin::new("test", create_test);
    assert_eq!(plugin.identifier(), "test");
    assert!(plugin.create(&Input::Accept).is_ok());
    assert!(plugin.create(&Input::Reject).is_err());
}
