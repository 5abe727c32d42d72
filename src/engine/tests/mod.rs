use std::collections::BTreeMap;
use std::sync::Arc;

use super::*;
use crate::backend::PinRelease;
use crate::varrw::{RouteVarRW, VAR_POLICYTAGS, VarRW};
use yare::parameterized;


const METRIC: VarId = 20;
const AS_PATH: VarId = 21;
const NETWORK4: VarId = 22;

#[derive(Clone)]
struct SharedLogBuffer(Arc<std::sync::Mutex<Vec<u8>>>);

struct SharedLogWriter(Arc<std::sync::Mutex<Vec<u8>>>);

impl SharedLogBuffer {
    fn new() -> Self {
        SharedLogBuffer(Arc::new(std::sync::Mutex::new(Vec::new())))
    }

    fn contents(&self) -> String {
        String::from_utf8(self.0.lock().unwrap().clone()).unwrap()
    }
}

impl<'a> tracing_subscriber::fmt::MakeWriter<'a> for SharedLogBuffer {
    type Writer = SharedLogWriter;

    fn make_writer(&'a self) -> Self::Writer {
        SharedLogWriter(Arc::clone(&self.0))
    }
}

impl std::io::Write for SharedLogWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

fn order(unique: u64, position: u64) -> ConfigNodeId {
    ConfigNodeId::new(unique, position)
}

/// Engine with `bgp`, `rip` and `static` declared and compiles that run
/// immediately.
fn engine_with(config: EngineConfig) -> PolicyEngine {
    let mut engine = PolicyEngine::new(config);
    for protocol in ["bgp", "rip", "static"] {
        engine
            .add_varmap(protocol, "metric", ValueType::U32, Access::ReadWrite, METRIC)
            .unwrap();
        engine
            .add_varmap(protocol, "network4", ValueType::Ipv4Net, Access::Read, NETWORK4)
            .unwrap();
    }
    engine
        .add_varmap("bgp", "as-path", ValueType::Str, Access::ReadWrite, AS_PATH)
        .unwrap();
    engine
}

fn engine() -> PolicyEngine {
    engine_with(EngineConfig::default())
}

/// One term: name, source, dest and action text. Empty text leaves the
/// block out.
type TermText<'a> = (&'a str, &'a str, &'a str, &'a str);

fn add_policy(engine: &mut PolicyEngine, name: &str, terms: &[TermText<'_>]) {
    engine.create_policy(name).unwrap();
    let mut previous = 0;
    for (i, (term, source, dest, action)) in terms.iter().enumerate() {
        let unique = i as u64 + 1;
        engine.create_term(name, order(unique, previous), term).unwrap();
        previous = unique;
        for (block, text) in [
            (Block::Source, *source),
            (Block::Dest, *dest),
            (Block::Action, *action),
        ] {
            if !text.is_empty() {
                engine
                    .update_term_block(name, term, block, order(1, 0), text)
                    .unwrap();
            }
        }
    }
}

fn compile(engine: &mut PolicyEngine) -> CommitReport {
    engine
        .commit(Some(Duration::ZERO))
        .unwrap()
        .expect("zero delay compiles immediately")
}

fn attrs(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

fn route(metric: u32, network: &str) -> RouteVarRW {
    RouteVarRW::new()
        .with(METRIC, Value::U32(metric))
        .with(NETWORK4, Value::create(ValueType::Ipv4Net, network).unwrap())
}

include!("core.rs");
include!("evaluate.rs");
include!("listing.rs");
