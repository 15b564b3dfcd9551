use parking_lot::Mutex;
use polycall::{
    BridgeConfig, Value,
    api::{self, Status},
    loader::ScriptLoader,
};

// The api keeps one process-wide bridge; tests take turns with it.
static SERIAL: Mutex<()> = Mutex::new(());

#[test]
fn test_calls_before_initialize_report_not_initialized() {
    let _serial = SERIAL.lock();
    assert_eq!(api::destroy(), Status::NotInitialized);
    assert_eq!(
        api::load_from_memory("mock", "", "nothing"),
        Status::NotInitialized
    );
    assert!(api::call("mock:empty", vec![]).is_err());
    assert!(api::function("mock:empty").is_none());
    assert_eq!(api::inspect(), serde_json::Value::Null);
}

#[test]
fn test_initialize_is_idempotent() {
    let _serial = SERIAL.lock();
    assert_eq!(api::initialize_with(BridgeConfig::default()), Status::Ok);
    let first = api::bridge().unwrap();
    assert_eq!(api::initialize(), Status::Ok);
    let second = api::bridge().unwrap();
    assert_eq!(
        first.registry().get("host").unwrap().id(),
        second.registry().get("host").unwrap().id()
    );
    drop((first, second));
    assert_eq!(api::destroy(), Status::Ok);
    assert_eq!(api::destroy(), Status::NotInitialized);
}

#[test]
fn test_load_and_call_through_status_surface() {
    let _serial = SERIAL.lock();
    assert_eq!(api::initialize_with(BridgeConfig::default()), Status::Ok);
    assert_eq!(api::register_loader("py", ScriptLoader::new), Status::Ok);

    assert_eq!(
        api::load_from_memory("py", "def add(a, b):\n    return a + b\n", "add.py"),
        Status::Ok
    );
    assert_eq!(
        api::call("py:add", vec![Value::Int(2), Value::Int(3)]).unwrap(),
        Value::Int(5)
    );

    let handle = api::function("add").unwrap();
    assert_eq!(
        api::call_handle(&handle, vec![Value::from("a"), Value::from("b")]).unwrap(),
        Value::from("ab")
    );

    assert_eq!(
        api::load_from_memory("py", "def broken(:\n", "broken.py"),
        Status::Load
    );
    assert_eq!(
        api::load_from_memory("cobol", "", "main.cbl"),
        Status::UnknownLoader
    );
    let err = api::call("py:nothing", vec![]).unwrap_err();
    assert_eq!(Status::from(&err), Status::UnknownSymbol);
    assert_eq!(
        api::load_from_file("py", &["/nonexistent/polycall/missing.py"]),
        Status::Load
    );

    insta::assert_snapshot!(
        serde_json::to_string(&api::inspect()["py"]["functions"]).unwrap(),
        @r#"[{"name":"add","params":[{"name":"a","kind":null},{"name":"b","kind":null}],"variadic":false,"returns":null}]"#
    );

    drop(handle);
    assert_eq!(api::destroy(), Status::Ok);
}

#[test]
fn test_guest_may_call_back_into_api() {
    let _serial = SERIAL.lock();
    assert_eq!(api::initialize_with(BridgeConfig::default()), Status::Ok);
    let bridge = api::bridge().unwrap();
    bridge
        .host_function("nested", |_, _| api::call("mock:my_empty_func", vec![]))
        .unwrap();
    drop(bridge);

    assert_eq!(api::call("host:nested", vec![]).unwrap(), Value::Int(1234));
    assert_eq!(api::destroy(), Status::Ok);
}
