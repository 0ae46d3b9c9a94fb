//! Registry wiring: gated driver init and URI routing.

use cartlink::{init_registry, Capability, Settings};
use url::Url;

fn test_settings() -> Settings {
    Settings {
        // An ephemeral port keeps parallel test runs from colliding on
        // the default luabridge listen address.
        luabridge_listen: "127.0.0.1:0".to_string(),
        ..Settings::default()
    }
}

#[test]
fn all_drivers_register_in_display_order() {
    let registry = init_registry(&test_settings());
    let kinds: Vec<_> = registry.all().iter().map(|d| d.kind()).collect();
    assert_eq!(kinds, ["fxpakpro", "emunwa", "luabridge"]);
}

#[test]
fn gate_flags_suppress_registration() {
    let settings = Settings {
        emunw_disable: true,
        fxpakpro_disable: true,
        ..test_settings()
    };
    let registry = init_registry(&settings);
    let kinds: Vec<_> = registry.all().iter().map(|d| d.kind()).collect();
    assert_eq!(kinds, ["luabridge"]);
}

#[test]
fn uri_scheme_routes_to_the_driver() {
    let registry = init_registry(&test_settings());

    let uri = Url::parse("fxpakpro://./dev/ttyACM0?baud=921600").unwrap();
    let driver = registry.driver_for_uri(&uri).unwrap();
    assert_eq!(driver.kind(), "fxpakpro");
    assert!(driver.has_capabilities(&[Capability::BootFile, Capability::ReadDirectory]));

    let uri = Url::parse("emunwa://localhost:48879").unwrap();
    let driver = registry.driver_for_uri(&uri).unwrap();
    assert!(driver.has_capabilities(&[Capability::PauseUnpauseEmulation]));
    assert!(!driver.has_capabilities(&[Capability::BootFile]));

    let uri = Url::parse("nosuch://x").unwrap();
    assert!(registry.driver_for_uri(&uri).is_err());
}

#[test]
fn handles_route_through_the_registry() {
    let registry = init_registry(&test_settings());
    let uri = Url::parse("emunwa://localhost:48879").unwrap();
    let handle = registry.device(&uri).unwrap();
    assert_eq!(handle.key(), "localhost:48879");
}
