use std::{
    sync::{
        Arc, Barrier,
        atomic::{AtomicUsize, Ordering},
    },
    thread,
};

use polycall::{
    Bridge, BridgeConfig, Error, FunctionHandle, InvokeFailure, Loader, LoaderContext, Result,
    Value, loader::ScriptLoader,
};

/// Loader that only counts its lifecycle calls.
struct Counting {
    initialized: Arc<AtomicUsize>,
    fail: bool,
}

impl Loader for Counting {
    fn initialize(&self, context: LoaderContext) -> Result<()> {
        self.initialized.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(Error::Init {
                tag: context.tag().to_string(),
                message: "engine missing".to_string(),
            });
        }
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
        Ok(())
    }
}

fn counting(bridge: &Bridge, tag: &str, fail: bool) -> Arc<AtomicUsize> {
    let initialized = Arc::new(AtomicUsize::new(0));
    let counter = initialized.clone();
    bridge
        .register_loader(tag, move || Counting {
            initialized: counter.clone(),
            fail,
        })
        .unwrap();
    initialized
}

#[test]
fn test_concurrent_acquire_initializes_once() {
    let bridge = Bridge::new(BridgeConfig::default()).unwrap();
    let initialized = counting(&bridge, "node", false);

    let threads = 16;
    let barrier = Arc::new(Barrier::new(threads));
    let handles: Vec<_> = (0..threads)
        .map(|_| {
            let bridge = bridge.clone();
            let barrier = barrier.clone();
            thread::spawn(move || {
                barrier.wait();
                bridge.acquire("node").unwrap().id().instance
            })
        })
        .collect();

    let instances: Vec<u64> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    assert!(instances.windows(2).all(|w| w[0] == w[1]));
    assert_eq!(initialized.load(Ordering::SeqCst), 1);
    assert_eq!(bridge.registry().loaders().len(), 2);
}

#[test]
fn test_failed_initialization_is_cached() {
    let bridge = Bridge::new(BridgeConfig::default()).unwrap();
    let initialized = counting(&bridge, "ruby", true);

    insta::allow_duplicates! {
        for _ in 0..3 {
            let err = bridge.acquire("ruby").unwrap_err();
            insta::assert_snapshot!(
                err.to_string(),
                @"loader `ruby` failed to initialize: engine missing"
            );
        }
    }
    assert_eq!(initialized.load(Ordering::SeqCst), 1);
    assert!(bridge.registry().get("ruby").is_none());
}

#[test]
fn test_unknown_tag_is_reported() {
    let bridge = Bridge::new(BridgeConfig::default()).unwrap();
    let err = bridge.acquire("cobol").unwrap_err();
    assert!(matches!(err, Error::UnknownLoader { ref tag } if tag == "cobol"));

    let err = bridge.call("cobol:main", vec![]).unwrap_err();
    assert!(matches!(err.root_cause(), Error::UnknownLoader { .. }));
}

#[test]
fn test_unknown_symbol_does_not_resolve() {
    let bridge = Bridge::new(BridgeConfig::default()).unwrap();
    bridge.register_loader("py", ScriptLoader::new).unwrap();
    bridge
        .load_from_memory("py", "def known():\n    return 1\n", "known.py")
        .unwrap();

    assert!(bridge.function("py:known").is_some());
    assert!(bridge.function("py:never_loaded").is_none());
    assert!(bridge.function("never_loaded").is_none());
    assert!(bridge.function("py:").is_none());
}

#[test]
fn test_parallel_calls_into_different_tags() {
    let bridge = Bridge::new(BridgeConfig::default()).unwrap();
    bridge.register_loader("py", ScriptLoader::new).unwrap();
    bridge
        .load_from_memory("py", "def square(x):\n    return x * x\n", "square.py")
        .unwrap();

    let calls: Vec<(String, Vec<Value>)> = (0..32)
        .map(|i| {
            if i % 2 == 0 {
                ("py:square".to_string(), vec![Value::Int(i)])
            } else {
                ("mock:my_empty_func".to_string(), vec![])
            }
        })
        .collect();

    let results = bridge.dispatcher().call_all(calls);
    for (i, result) in results.into_iter().enumerate() {
        let expected = if i % 2 == 0 {
            Value::Int((i * i) as i32)
        } else {
            Value::Int(1234)
        };
        assert_eq!(result.unwrap(), expected);
    }
    assert!(bridge.stack().is_empty());
}

#[test]
fn test_inspect_lists_loaders_in_creation_order() {
    let bridge = Bridge::new(BridgeConfig::default()).unwrap();
    bridge.register_loader("py", ScriptLoader::new).unwrap();
    bridge
        .load_from_memory("py", "def greet(name):\n    return 'hi ' + name\n", "greet.py")
        .unwrap();

    let report = bridge.inspect();
    let tags: Vec<&String> = report.as_object().unwrap().keys().collect();
    assert_eq!(tags, ["host", "py"]);
    insta::assert_snapshot!(
        serde_json::to_string(&report["py"]).unwrap(),
        @r#"{"state":"ready","degraded":false,"instance":2,"functions":[{"name":"greet","params":[{"name":"name","kind":null}],"variadic":false,"returns":null}]}"#
    );
}

/// Loader whose initialization parks until the test lets it finish.
struct Gated {
    started: Arc<Barrier>,
    resume: Arc<Barrier>,
    destroyed: Arc<AtomicUsize>,
}

impl Loader for Gated {
    fn initialize(&self, _context: LoaderContext) -> Result<()> {
        self.started.wait();
        self.resume.wait();
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
        self.destroyed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[test]
fn test_acquire_racing_teardown_is_destroyed() {
    let bridge = Bridge::new(BridgeConfig::default()).unwrap();
    let started = Arc::new(Barrier::new(2));
    let resume = Arc::new(Barrier::new(2));
    let destroyed = Arc::new(AtomicUsize::new(0));
    {
        let started = started.clone();
        let resume = resume.clone();
        let destroyed = destroyed.clone();
        bridge
            .register_loader("late", move || Gated {
                started: started.clone(),
                resume: resume.clone(),
                destroyed: destroyed.clone(),
            })
            .unwrap();
    }

    let acquiring = {
        let bridge = bridge.clone();
        thread::spawn(move || bridge.acquire("late").map(|slot| slot.id().clone()))
    };

    // The loader is mid-initialization while the bridge tears down.
    started.wait();
    bridge.destroy().unwrap();
    resume.wait();

    let err = acquiring.join().unwrap().unwrap_err();
    assert!(matches!(err, Error::NotInitialized), "{err}");
    assert_eq!(destroyed.load(Ordering::SeqCst), 1);
    assert!(bridge.registry().loaders().is_empty());
}
