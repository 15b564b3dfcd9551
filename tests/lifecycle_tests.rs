use std::{sync::Arc, thread, time::Duration};

use parking_lot::Mutex;
use polycall::{
    Bridge, BridgeConfig, Error, FunctionHandle, InvokeFailure, Loader, LoaderContext, Result,
    Value, loader::MockLoader,
};

type Log = Arc<Mutex<Vec<String>>>;

/// Records its teardown in a shared log.
struct Recording {
    tag: Mutex<String>,
    log: Log,
    fail_destroy: bool,
}

impl Loader for Recording {
    fn initialize(&self, context: LoaderContext) -> Result<()> {
        *self.tag.lock() = context.tag().to_string();
        Ok(())
    }

    fn load(&self, _source: &str, _origin: &str) -> Result<Vec<String>> {
        Ok(Vec::new())
    }

    fn resolve(&self, _name: &str) -> Option<FunctionHandle> {
        None
    }

    fn invoke(
        &self,
        _function: &FunctionHandle,
        _args: Vec<Value>,
    ) -> std::result::Result<Value, InvokeFailure> {
        Ok(Value::Null)
    }

    fn symbols(&self) -> Vec<FunctionHandle> {
        Vec::new()
    }

    fn destroy(&self) -> Result<()> {
        let tag = self.tag.lock().clone();
        self.log.lock().push(tag.clone());
        if self.fail_destroy {
            return Err(Error::Guest {
                tag,
                message: "engine refused to stop".to_string(),
            });
        }
        Ok(())
    }
}

fn register(bridge: &Bridge, tag: &str, log: &Log, fail_destroy: bool) {
    let log = log.clone();
    bridge
        .register_loader(tag, move || Recording {
            tag: Mutex::new(String::new()),
            log: log.clone(),
            fail_destroy,
        })
        .unwrap();
}

#[test]
fn test_teardown_runs_in_reverse_creation_order_once() {
    let bridge = Bridge::new(BridgeConfig::default()).unwrap();
    let log = Log::default();
    register(&bridge, "first", &log, false);
    register(&bridge, "second", &log, false);
    register(&bridge, "third", &log, false);

    bridge.acquire("second").unwrap();
    bridge.acquire("first").unwrap();
    bridge.acquire("third").unwrap();

    bridge.destroy().unwrap();
    assert_eq!(*log.lock(), ["third", "first", "second"]);

    bridge.destroy().unwrap();
    assert_eq!(log.lock().len(), 3);
}

#[test]
fn test_calls_after_destroy_fail_cleanly() {
    let bridge = Bridge::new(BridgeConfig::default()).unwrap();
    let handle = bridge.function("mock:my_empty_func").unwrap();
    let dispatcher = bridge.dispatcher();
    bridge.destroy().unwrap();

    let err = bridge.call("mock:my_empty_func", vec![]).unwrap_err();
    assert!(matches!(err.root_cause(), Error::NotInitialized), "{err}");

    let err = bridge.call(&handle, vec![]).unwrap_err();
    assert!(matches!(err.root_cause(), Error::StaleHandle { .. }), "{err}");

    let err = dispatcher.call("my_empty_func", vec![]).unwrap_err();
    assert!(matches!(err.root_cause(), Error::UnknownSymbol { .. }), "{err}");

    assert!(matches!(
        bridge.load_from_memory(MockLoader::TAG, "", "late"),
        Err(Error::NotInitialized)
    ));
    assert!(matches!(
        bridge.register_loader("late", MockLoader::new),
        Err(Error::NotInitialized)
    ));
    assert!(bridge.function("mock:my_empty_func").is_none());
}

#[test]
fn test_dispatcher_outliving_bridge_reports_not_initialized() {
    let dispatcher = {
        let bridge = Bridge::new(BridgeConfig::default()).unwrap();
        bridge.dispatcher()
    };
    let err = dispatcher.call("mock:empty", vec![]).unwrap_err();
    assert!(matches!(err, Error::NotInitialized));
}

#[test]
fn test_destroy_refused_while_call_is_active() {
    let bridge = Bridge::new(BridgeConfig::default()).unwrap();
    let inner = bridge.clone();
    bridge
        .host_function("shutdown", move |_, _| match inner.destroy() {
            Ok(()) => Ok(Value::Null),
            Err(err) => Ok(Value::String(err.to_string())),
        })
        .unwrap();

    let result = bridge.call("host:shutdown", vec![]).unwrap();
    assert_eq!(
        result,
        Value::String("cannot destroy while 1 call frame(s) are active".into())
    );
    assert!(!bridge.is_destroyed());

    bridge.destroy().unwrap();
    assert!(bridge.is_destroyed());
}

#[test]
fn test_release_all_refuses_busy_tag() {
    let bridge = Bridge::new(BridgeConfig::default()).unwrap();
    bridge.acquire(MockLoader::TAG).unwrap();

    let frame = bridge.stack().push(MockLoader::TAG, "manual").unwrap();
    let err = bridge.registry().release_all(bridge.stack()).unwrap_err();
    insta::assert_snapshot!(
        err.to_string(),
        @"cannot tear down loader `mock`: 1 call frame(s) still active"
    );
    assert!(!bridge.is_destroyed());
    drop(frame);

    assert_eq!(
        bridge.call("mock:my_empty_func", vec![]).unwrap(),
        Value::Int(1234)
    );
    bridge.destroy().unwrap();
}

#[test]
fn test_teardown_failures_are_aggregated() {
    let bridge = Bridge::new(BridgeConfig::default()).unwrap();
    let log = Log::default();
    register(&bridge, "flaky", &log, true);
    register(&bridge, "steady", &log, false);
    bridge.acquire("flaky").unwrap();
    bridge.acquire("steady").unwrap();

    let err = bridge.destroy().unwrap_err();
    insta::assert_snapshot!(
        err.to_string(),
        @"teardown failed: guest error in `flaky`: engine refused to stop"
    );
    assert_eq!(*log.lock(), ["steady", "flaky"]);
    assert!(bridge.is_destroyed());
}

#[test]
fn test_slow_invoke_marks_loader_degraded() {
    let config = BridgeConfig::default().with_invoke_timeout(Duration::from_millis(1));
    let bridge = Bridge::new(config).unwrap();
    bridge
        .host_function("slow", |_, _| {
            thread::sleep(Duration::from_millis(20));
            Ok(Value::Bool(true))
        })
        .unwrap();

    assert_eq!(bridge.call("host:slow", vec![]).unwrap(), Value::Bool(true));
    let host = bridge.registry().get("host").unwrap();
    assert!(host.is_degraded());
    assert_eq!(bridge.inspect()["host"]["degraded"], serde_json::json!(true));
}

#[test]
fn test_recreated_bridge_starts_fresh() {
    let first = Bridge::new(BridgeConfig::default()).unwrap();
    first.destroy().unwrap();

    let second = Bridge::new(BridgeConfig::default()).unwrap();
    assert_eq!(
        second.call("mock:my_empty_func", vec![]).unwrap(),
        Value::Int(1234)
    );
    assert!(first.is_destroyed());
    assert!(!second.is_destroyed());
}
