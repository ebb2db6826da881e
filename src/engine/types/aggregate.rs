use ahash::AHashMap;
use std::sync::Arc;

use crate::engine::errors::TypeError;
use crate::engine::types::type_registry::{TID_AGGREGATE_STATE, TID_DOUBLE, TID_UINT64};
use crate::engine::types::value::Value;

/// An aggregate over one attribute. States live in chunks as nullable
/// values: reason 0 means "no state yet", anything else is a live state
/// that merge() may combine.
pub trait Aggregate: Send + Sync {
    fn name(&self) -> &str;

    fn state_type(&self) -> &str;

    fn result_type(&self) -> &str;

    /// Fresh state before any input was seen.
    fn init_state(&self) -> Value {
        Value::absent()
    }

    fn accumulate(&self, state: &mut Value, input: &Value);

    /// Combines two live states; associative for every built-in.
    fn merge(&self, dst: &mut Value, src: &Value);

    fn finalize(&self, state: &Value) -> Value;
}

/// (count, sum, sum of squares) packed little-endian; the running state of
/// every numeric aggregate in the library.
#[derive(Debug, Clone, Copy, PartialEq)]
struct NumericState {
    count: u64,
    sum: f64,
    sum_sq: f64,
    min: f64,
    max: f64,
}

impl NumericState {
    fn empty() -> Self {
        Self {
            count: 0,
            sum: 0.0,
            sum_sq: 0.0,
            min: f64::INFINITY,
            max: f64::NEG_INFINITY,
        }
    }

    fn from_value(v: &Value) -> Self {
        if v.is_null() || v.size() < 40 {
            return Self::empty();
        }
        let d = v.data();
        Self {
            count: u64::from_le_bytes(d[0..8].try_into().unwrap()),
            sum: f64::from_le_bytes(d[8..16].try_into().unwrap()),
            sum_sq: f64::from_le_bytes(d[16..24].try_into().unwrap()),
            min: f64::from_le_bytes(d[24..32].try_into().unwrap()),
            max: f64::from_le_bytes(d[32..40].try_into().unwrap()),
        }
    }

    fn to_value(self) -> Value {
        let mut buf = Vec::with_capacity(40);
        buf.extend_from_slice(&self.count.to_le_bytes());
        buf.extend_from_slice(&self.sum.to_le_bytes());
        buf.extend_from_slice(&self.sum_sq.to_le_bytes());
        buf.extend_from_slice(&self.min.to_le_bytes());
        buf.extend_from_slice(&self.max.to_le_bytes());
        Value::from_bytes(buf)
    }

    fn observe(&mut self, x: f64) {
        self.count += 1;
        self.sum += x;
        self.sum_sq += x * x;
        self.min = self.min.min(x);
        self.max = self.max.max(x);
    }

    fn combine(&mut self, other: &NumericState) {
        self.count += other.count;
        self.sum += other.sum;
        self.sum_sq += other.sum_sq;
        self.min = self.min.min(other.min);
        self.max = self.max.max(other.max);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Kind {
    Sum,
    Avg,
    Min,
    Max,
    Count,
    Var,
    Stdev,
}

struct NumericAggregate {
    name: &'static str,
    kind: Kind,
}

impl Aggregate for NumericAggregate {
    fn name(&self) -> &str {
        self.name
    }

    fn state_type(&self) -> &str {
        TID_AGGREGATE_STATE
    }

    fn result_type(&self) -> &str {
        match self.kind {
            Kind::Count => TID_UINT64,
            _ => TID_DOUBLE,
        }
    }

    fn accumulate(&self, state: &mut Value, input: &Value) {
        if input.is_null() {
            return;
        }
        let mut s = NumericState::from_value(state);
        s.observe(input.get_f64());
        *state = s.to_value();
    }

    fn merge(&self, dst: &mut Value, src: &Value) {
        if src.is_null() {
            return;
        }
        let other = NumericState::from_value(src);
        if dst.is_null() {
            *dst = other.to_value();
            return;
        }
        let mut s = NumericState::from_value(dst);
        s.combine(&other);
        *dst = s.to_value();
    }

    fn finalize(&self, state: &Value) -> Value {
        if state.is_null() {
            return Value::null(state.missing_reason().unwrap_or(0));
        }
        let s = NumericState::from_value(state);
        match self.kind {
            Kind::Count => Value::from_u64(s.count),
            _ if s.count == 0 => Value::null(1),
            Kind::Sum => Value::from_f64(s.sum),
            Kind::Avg => Value::from_f64(s.sum / s.count as f64),
            Kind::Min => Value::from_f64(s.min),
            Kind::Max => Value::from_f64(s.max),
            Kind::Var => Value::from_f64(variance(&s)),
            Kind::Stdev => Value::from_f64(variance(&s).sqrt()),
        }
    }
}

fn variance(s: &NumericState) -> f64 {
    if s.count < 2 {
        return 0.0;
    }
    let n = s.count as f64;
    (s.sum_sq - s.sum * s.sum / n) / (n - 1.0)
}

/// Resolves aggregate calls by name; every built-in accepts any numeric
/// input attribute (`count` accepts anything, including the asterisk).
pub struct AggregateLibrary {
    aggregates: AHashMap<String, Arc<dyn Aggregate>>,
}

impl AggregateLibrary {
    pub fn builtin() -> Self {
        let mut aggregates: AHashMap<String, Arc<dyn Aggregate>> = AHashMap::new();
        for (name, kind) in [
            ("sum", Kind::Sum),
            ("avg", Kind::Avg),
            ("min", Kind::Min),
            ("max", Kind::Max),
            ("count", Kind::Count),
            ("var", Kind::Var),
            ("stdev", Kind::Stdev),
        ] {
            aggregates.insert(name.to_string(), Arc::new(NumericAggregate { name, kind }));
        }
        Self { aggregates }
    }

    pub fn resolve(&self, name: &str) -> Result<Arc<dyn Aggregate>, TypeError> {
        self.aggregates
            .get(name)
            .cloned()
            .ok_or_else(|| TypeError::FunctionNotFound {
                name: name.to_string(),
                args: "aggregate".to_string(),
            })
    }

    pub fn contains(&self, name: &str) -> bool {
        self.aggregates.contains_key(name)
    }
}

impl Default for AggregateLibrary {
    fn default() -> Self {
        Self::builtin()
    }
}
