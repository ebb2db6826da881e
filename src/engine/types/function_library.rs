use ahash::AHashMap;

use crate::engine::errors::TypeError;
use crate::engine::types::type_registry::{
    TID_BOOL, TID_DOUBLE, TID_FLOAT, TID_INT16, TID_INT32, TID_INT64, TID_INT8, TID_STRING,
};
use crate::engine::types::value::Value;

pub type ScalarFunction = fn(&[Value]) -> Result<Value, TypeError>;

/// Cost of applying a converter; candidates are ranked by total cost.
pub type ConversionCost = u32;

#[derive(Debug, Clone)]
pub struct FunctionDescription {
    pub name: String,
    pub arg_types: Vec<String>,
    pub result_type: String,
    pub func: ScalarFunction,
    pub commutative: bool,
    order: usize,
}

#[derive(Clone)]
pub struct Converter {
    pub func: ScalarFunction,
    pub cost: ConversionCost,
}

/// The result of resolving `(name, argTypes)` against the catalog.
/// `converters[i]` is `None` when argument `i` already has the right type.
#[derive(Debug)]
pub struct ResolvedFunction {
    pub description: FunctionDescription,
    pub converters: Vec<Option<ScalarFunction>>,
    pub swap_inputs: bool,
    pub cost: ConversionCost,
}

impl ResolvedFunction {
    /// Applies converters (honoring `swap_inputs`) and calls the function.
    pub fn call(&self, args: &[Value]) -> Result<Value, TypeError> {
        let mut ordered: Vec<&Value> = args.iter().collect();
        if self.swap_inputs && ordered.len() == 2 {
            ordered.swap(0, 1);
        }
        let mut converted = Vec::with_capacity(ordered.len());
        for (i, arg) in ordered.iter().enumerate() {
            match self.converters.get(i).and_then(|c| *c) {
                Some(conv) if !arg.is_null() => converted.push(conv(&[(*arg).clone()])?),
                _ => converted.push((*arg).clone()),
            }
        }
        (self.description.func)(&converted)
    }
}

/// Scalar functions and type converters, resolved by name and argument
/// types with minimum-converter-cost tie-breaking.
pub struct FunctionLibrary {
    functions: AHashMap<String, Vec<FunctionDescription>>,
    converters: AHashMap<(String, String), Converter>,
    next_order: usize,
}

impl FunctionLibrary {
    pub fn new() -> Self {
        Self {
            functions: AHashMap::new(),
            converters: AHashMap::new(),
            next_order: 0,
        }
    }

    pub fn builtin() -> Self {
        let mut lib = Self::new();
        lib.register_builtin_converters();
        lib.register_builtin_functions();
        lib
    }

    pub fn add_function(
        &mut self,
        name: &str,
        arg_types: &[&str],
        result_type: &str,
        func: ScalarFunction,
        commutative: bool,
    ) {
        let order = self.next_order;
        self.next_order += 1;
        self.functions
            .entry(name.to_string())
            .or_default()
            .push(FunctionDescription {
                name: name.to_string(),
                arg_types: arg_types.iter().map(|s| s.to_string()).collect(),
                result_type: result_type.to_string(),
                func,
                commutative,
                order,
            });
    }

    pub fn add_converter(
        &mut self,
        src: &str,
        dst: &str,
        func: ScalarFunction,
        cost: ConversionCost,
    ) {
        self.converters
            .insert((src.to_string(), dst.to_string()), Converter { func, cost });
    }

    pub fn find_converter(&self, src: &str, dst: &str) -> Option<&Converter> {
        self.converters.get(&(src.to_string(), dst.to_string()))
    }

    pub fn has_function(&self, name: &str) -> bool {
        self.functions.contains_key(name)
    }

    /// Resolution policy:
    /// 1. exact match on `(name, argTypes)`;
    /// 2. otherwise the minimum-total-converter-cost candidate, ties broken
    ///    by earliest registration;
    /// 3. commutative candidates are also tried with swapped arguments and
    ///    win only on strictly lower cost (the caller must then swap);
    /// 4. otherwise `FunctionNotFound`.
    pub fn resolve(&self, name: &str, arg_types: &[&str]) -> Result<ResolvedFunction, TypeError> {
        let not_found = || TypeError::FunctionNotFound {
            name: name.to_string(),
            args: arg_types.join(","),
        };
        let candidates = self.functions.get(name).ok_or_else(not_found)?;

        if let Some(desc) = candidates
            .iter()
            .find(|d| d.arg_types.len() == arg_types.len() && matches_exact(d, arg_types))
        {
            return Ok(ResolvedFunction {
                description: desc.clone(),
                converters: vec![None; arg_types.len()],
                swap_inputs: false,
                cost: 0,
            });
        }

        let mut best: Option<ResolvedFunction> = None;
        for desc in candidates {
            if desc.arg_types.len() != arg_types.len() {
                continue;
            }
            if let Some((convs, cost)) = self.conversion_plan(desc, arg_types) {
                if best.as_ref().map_or(true, |b| cost < b.cost) {
                    best = Some(ResolvedFunction {
                        description: desc.clone(),
                        converters: convs,
                        swap_inputs: false,
                        cost,
                    });
                }
            }
            if desc.commutative && arg_types.len() == 2 {
                let swapped = [arg_types[1], arg_types[0]];
                if let Some((convs, cost)) = self.conversion_plan(desc, &swapped) {
                    if best.as_ref().map_or(true, |b| cost < b.cost) {
                        best = Some(ResolvedFunction {
                            description: desc.clone(),
                            converters: convs,
                            swap_inputs: true,
                            cost,
                        });
                    }
                }
            }
        }
        best.ok_or_else(not_found)
    }

    fn conversion_plan(
        &self,
        desc: &FunctionDescription,
        arg_types: &[&str],
    ) -> Option<(Vec<Option<ScalarFunction>>, ConversionCost)> {
        let mut convs = Vec::with_capacity(arg_types.len());
        let mut total = 0u32;
        for (given, wanted) in arg_types.iter().zip(desc.arg_types.iter()) {
            if *given == wanted.as_str() {
                convs.push(None);
            } else {
                let conv = self.find_converter(given, wanted)?;
                total += conv.cost;
                convs.push(Some(conv.func));
            }
        }
        Some((convs, total))
    }

    fn register_builtin_converters(&mut self) {
        fn widen_i64(args: &[Value]) -> Result<Value, TypeError> {
            Ok(Value::from_i64(args[0].get_i64()))
        }
        fn to_double(args: &[Value]) -> Result<Value, TypeError> {
            Ok(Value::from_f64(args[0].get_f64()))
        }
        fn int_to_double(args: &[Value]) -> Result<Value, TypeError> {
            Ok(Value::from_f64(args[0].get_i64() as f64))
        }

        for (src, cost) in [(TID_INT8, 3u32), (TID_INT16, 2), (TID_INT32, 1)] {
            self.add_converter(src, TID_INT64, widen_i64, cost);
            self.add_converter(src, TID_DOUBLE, int_to_double, cost + 1);
        }
        self.add_converter(TID_INT64, TID_DOUBLE, int_to_double, 2);
        self.add_converter(TID_FLOAT, TID_DOUBLE, to_double, 1);
    }

    fn register_builtin_functions(&mut self) {
        macro_rules! arith {
            ($name:expr, $op:tt, $commut:expr) => {{
                fn f_i64(args: &[Value]) -> Result<Value, TypeError> {
                    if args[0].is_null() || args[1].is_null() {
                        return Ok(Value::null(args[0].missing_reason().or(args[1].missing_reason()).unwrap_or(1)));
                    }
                    Ok(Value::from_i64(args[0].get_i64() $op args[1].get_i64()))
                }
                fn f_f64(args: &[Value]) -> Result<Value, TypeError> {
                    if args[0].is_null() || args[1].is_null() {
                        return Ok(Value::null(args[0].missing_reason().or(args[1].missing_reason()).unwrap_or(1)));
                    }
                    Ok(Value::from_f64(args[0].get_f64() $op args[1].get_f64()))
                }
                self.add_function($name, &[TID_INT64, TID_INT64], TID_INT64, f_i64, $commut);
                self.add_function($name, &[TID_DOUBLE, TID_DOUBLE], TID_DOUBLE, f_f64, $commut);
            }};
        }
        arith!("+", +, true);
        arith!("-", -, false);
        arith!("*", *, true);

        fn div_f64(args: &[Value]) -> Result<Value, TypeError> {
            if args[0].is_null() || args[1].is_null() {
                return Ok(Value::null(1));
            }
            Ok(Value::from_f64(args[0].get_f64() / args[1].get_f64()))
        }
        self.add_function("/", &[TID_DOUBLE, TID_DOUBLE], TID_DOUBLE, div_f64, false);

        macro_rules! cmp {
            ($name:expr, $expect:expr) => {{
                fn f_i64(args: &[Value]) -> Result<Value, TypeError> {
                    if args[0].is_null() || args[1].is_null() {
                        return Ok(Value::from_bool(false));
                    }
                    Ok(Value::from_bool(
                        args[0].get_i64().cmp(&args[1].get_i64()) == $expect,
                    ))
                }
                fn f_f64(args: &[Value]) -> Result<Value, TypeError> {
                    if args[0].is_null() || args[1].is_null() {
                        return Ok(Value::from_bool(false));
                    }
                    Ok(Value::from_bool(
                        args[0]
                            .get_f64()
                            .partial_cmp(&args[1].get_f64())
                            .map(|o| o == $expect)
                            .unwrap_or(false),
                    ))
                }
                fn f_str(args: &[Value]) -> Result<Value, TypeError> {
                    if args[0].is_null() || args[1].is_null() {
                        return Ok(Value::from_bool(false));
                    }
                    Ok(Value::from_bool(
                        args[0].data().cmp(args[1].data()) == $expect,
                    ))
                }
                self.add_function($name, &[TID_INT64, TID_INT64], TID_BOOL, f_i64, false);
                self.add_function($name, &[TID_DOUBLE, TID_DOUBLE], TID_BOOL, f_f64, false);
                self.add_function($name, &[TID_STRING, TID_STRING], TID_BOOL, f_str, false);
            }};
        }
        cmp!("=", std::cmp::Ordering::Equal);
        cmp!("<", std::cmp::Ordering::Less);
        cmp!(">", std::cmp::Ordering::Greater);

        fn ne(args: &[Value]) -> Result<Value, TypeError> {
            Ok(Value::from_bool(
                !args[0].is_null() && !args[1].is_null() && args[0].data() != args[1].data(),
            ))
        }
        self.add_function("<>", &[TID_INT64, TID_INT64], TID_BOOL, ne, false);
        self.add_function("<>", &[TID_DOUBLE, TID_DOUBLE], TID_BOOL, ne, false);
        self.add_function("<>", &[TID_STRING, TID_STRING], TID_BOOL, ne, false);

        fn le(args: &[Value]) -> Result<Value, TypeError> {
            if args[0].is_null() || args[1].is_null() {
                return Ok(Value::from_bool(false));
            }
            Ok(Value::from_bool(args[0].get_f64() <= args[1].get_f64()))
        }
        fn ge(args: &[Value]) -> Result<Value, TypeError> {
            if args[0].is_null() || args[1].is_null() {
                return Ok(Value::from_bool(false));
            }
            Ok(Value::from_bool(args[0].get_f64() >= args[1].get_f64()))
        }
        self.add_function("<=", &[TID_DOUBLE, TID_DOUBLE], TID_BOOL, le, false);
        self.add_function(">=", &[TID_DOUBLE, TID_DOUBLE], TID_BOOL, ge, false);

        fn and(args: &[Value]) -> Result<Value, TypeError> {
            Ok(Value::from_bool(args[0].get_bool() && args[1].get_bool()))
        }
        fn or(args: &[Value]) -> Result<Value, TypeError> {
            Ok(Value::from_bool(args[0].get_bool() || args[1].get_bool()))
        }
        fn not(args: &[Value]) -> Result<Value, TypeError> {
            Ok(Value::from_bool(!args[0].get_bool()))
        }
        self.add_function("and", &[TID_BOOL, TID_BOOL], TID_BOOL, and, true);
        self.add_function("or", &[TID_BOOL, TID_BOOL], TID_BOOL, or, true);
        self.add_function("not", &[TID_BOOL], TID_BOOL, not, false);
    }
}

fn matches_exact(desc: &FunctionDescription, arg_types: &[&str]) -> bool {
    desc.arg_types
        .iter()
        .zip(arg_types.iter())
        .all(|(a, b)| a == b)
}

impl Default for FunctionLibrary {
    fn default() -> Self {
        Self::builtin()
    }
}
