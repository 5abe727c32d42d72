//! Behaviour across the compiler, the installed filters and route
//! evaluation, driven through [`PolicyEngine`].


use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use crate::backend::{Outcome, VersionFilters};
use crate::config::EngineConfig;
use crate::engine::{CommitReport, PolicyEngine};
use crate::policy::Block;
use crate::types::{ConfigNodeId, Direction, Value, ValueType};
use crate::var_map::Access;
use crate::varrw::{RouteVarRW, VarId};

const METRIC: VarId = 20;
const PROTOCOLS: [&str; 3] = ["bgp", "rip", "static"];

/// An engine with every protocol attached, plus the attached filters.
struct Network {
    engine: PolicyEngine,
    filters: BTreeMap<&'static str, Arc<VersionFilters>>,
}

impl Network {
    fn new(config: EngineConfig) -> Self {
        let release = config.pin_release;
        let mut engine = PolicyEngine::new(config);
        let mut filters = BTreeMap::new();
        for protocol in PROTOCOLS {
            engine
                .add_varmap(protocol, "metric", ValueType::U32, Access::ReadWrite, METRIC)
                .unwrap();
            let slots = Arc::new(VersionFilters::new(release));
            engine.attach_protocol(protocol, Arc::clone(&slots)).unwrap();
            filters.insert(protocol, slots);
        }
        Network { engine, filters }
    }

    /// A policy with one term per `(source, dest, action)`; terms are
    /// named `t1`, `t2` and so on.
    fn policy(&mut self, name: &str, terms: &[(&str, &str, &str)]) {
        self.engine.create_policy(name).unwrap();
        let mut previous = 0;
        for (i, (source, dest, action)) in terms.iter().enumerate() {
            let unique = i as u64 + 1;
            let term = format!("t{unique}");
            self.engine
                .create_term(name, ConfigNodeId::new(unique, previous), &term)
                .unwrap();
            previous = unique;
            for (block, text) in [
                (Block::Source, *source),
                (Block::Dest, *dest),
                (Block::Action, *action),
            ] {
                if !text.is_empty() {
                    self.engine
                        .update_term_block(name, &term, block, ConfigNodeId::new(1, 0), text)
                        .unwrap();
                }
            }
        }
    }

    fn commit(&mut self) -> CommitReport {
        self.engine.commit(Some(Duration::ZERO)).unwrap().unwrap()
    }

    fn slot(&self, protocol: &str, direction: Direction) -> &crate::backend::VersionFilter {
        self.filters[protocol].get(direction)
    }

    /// Route from `origin` exported to `to`: the source-match filter of
    /// the origin, then the export filter of the destination.
    fn export(&self, origin: &str, to: &str, route: &mut RouteVarRW) -> Outcome {
        self.slot(origin, Direction::ExportSourceMatch)
            .accept_route(route)
            .unwrap();
        self.slot(to, Direction::Export).accept_route(route).unwrap()
    }
}

fn route(metric: u32) -> RouteVarRW {
    RouteVarRW::new().with(METRIC, Value::U32(metric))
}

fn metric(route: &RouteVarRW) -> Option<u32> {
    match route.get(METRIC) {
        Some(Value::U32(m)) => Some(*m),
        _ => None,
    }
}
