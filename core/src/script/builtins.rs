//! Capabilities available to routines.
//!
//! RULE: This is the entire outside world a routine can reach: pure math,
//! the distribution library, and error constructors. Sampling draws from
//! the run's own RNG, never a platform source.

use super::{
    interpreter::{Fault, FaultKind, Interpreter, Scope},
    value::Value,
};
use crate::{
    algorithms::var::z_score,
    distribution::{self as dist, Distribution},
    error::{AlgorithmError, StatsError},
};
use std::collections::BTreeMap;
use std::rc::Rc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Builtin {
    // Math
    Abs,
    Sqrt,
    Pow,
    Exp,
    Log,
    Floor,
    Ceil,
    Round,
    Min,
    Max,
    Random,
    // Sampling
    SampleNormal,
    SampleUniform,
    SampleTriangular,
    SampleLognormal,
    SampleDistribution,
    // Statistics
    Percentile,
    Mean,
    Median,
    StandardDeviation,
    Skewness,
    Kurtosis,
    Sum,
    SortAscending,
    ZScore,
    // Utilities
    Clamp,
    IsFinite,
    IsNaN,
    Error,
    RangeError,
}

const MATH: &[(&str, Builtin)] = &[
    ("abs", Builtin::Abs),
    ("sqrt", Builtin::Sqrt),
    ("pow", Builtin::Pow),
    ("exp", Builtin::Exp),
    ("log", Builtin::Log),
    ("floor", Builtin::Floor),
    ("ceil", Builtin::Ceil),
    ("round", Builtin::Round),
    ("min", Builtin::Min),
    ("max", Builtin::Max),
    ("random", Builtin::Random),
];

const GLOBALS: &[(&str, Builtin)] = &[
    ("sampleNormal", Builtin::SampleNormal),
    ("sampleUniform", Builtin::SampleUniform),
    ("sampleTriangular", Builtin::SampleTriangular),
    ("sampleLognormal", Builtin::SampleLognormal),
    ("sampleDistribution", Builtin::SampleDistribution),
    ("percentile", Builtin::Percentile),
    ("mean", Builtin::Mean),
    ("median", Builtin::Median),
    ("standardDeviation", Builtin::StandardDeviation),
    ("skewness", Builtin::Skewness),
    ("kurtosis", Builtin::Kurtosis),
    ("sum", Builtin::Sum),
    ("sortAscending", Builtin::SortAscending),
    ("zScore", Builtin::ZScore),
    ("clamp", Builtin::Clamp),
    ("isFinite", Builtin::IsFinite),
    ("isNaN", Builtin::IsNaN),
    ("Error", Builtin::Error),
    ("RangeError", Builtin::RangeError),
];

impl Builtin {
    pub fn name(&self) -> String {
        if let Some((name, _)) = MATH.iter().find(|(_, b)| b == self) {
            return format!("Math.{name}");
        }
        GLOBALS
            .iter()
            .find(|(_, b)| b == self)
            .map_or_else(|| format!("{self:?}"), |(name, _)| name.to_string())
    }
}

/// Bind `Math` and the global functions as constants in `scope`.
pub(super) fn install(interp: &mut Interpreter, scope: &Rc<Scope>) -> Result<(), Fault> {
    let mut math: BTreeMap<String, Value> = MATH
        .iter()
        .map(|(name, b)| (name.to_string(), Value::Builtin(*b)))
        .collect();
    math.insert("PI".into(), Value::Number(std::f64::consts::PI));
    math.insert("E".into(), Value::Number(std::f64::consts::E));
    let math = interp.new_object(math)?;
    scope.declare("Math", math, false);
    for (name, builtin) in GLOBALS {
        scope.declare(name, Value::Builtin(*builtin), false);
    }
    Ok(())
}

pub(super) fn call(interp: &mut Interpreter, builtin: Builtin, args: Vec<Value>) -> Result<Value, Fault> {
    let name = builtin.name();
    let args = Args { interp, name: &name, args };
    args.dispatch(builtin)
}

fn n(x: f64) -> Result<Value, Fault> {
    Ok(Value::Number(x))
}

struct Args<'a> {
    interp: &'a mut Interpreter,
    name:   &'a str,
    args:   Vec<Value>,
}

impl Args<'_> {
    fn dispatch(mut self, builtin: Builtin) -> Result<Value, Fault> {
        use Builtin::*;
        match builtin {
            Abs => n(self.number(0)?.abs()),
            Sqrt => n(self.number(0)?.sqrt()),
            Pow => n(self.number(0)?.powf(self.number(1)?)),
            Exp => n(self.number(0)?.exp()),
            Log => n(self.number(0)?.ln()),
            Floor => n(self.number(0)?.floor()),
            Ceil => n(self.number(0)?.ceil()),
            Round => n((self.number(0)? + 0.5).floor()),
            Min => n(self.all_numbers()?.into_iter().fold(f64::INFINITY, f64::min)),
            Max => n(self.all_numbers()?.into_iter().fold(f64::NEG_INFINITY, f64::max)),
            Random => n(self.interp.rng.next_f64()),

            SampleNormal => {
                let (mean, sd) = (self.number(0)?, self.number(1)?);
                let x = dist::sample_normal(&mut self.interp.rng, mean, sd);
                self.checked(x)
            }
            SampleUniform => {
                let (min, max) = (self.number(0)?, self.number(1)?);
                let x = dist::sample_uniform(&mut self.interp.rng, min, max);
                self.checked(x)
            }
            SampleTriangular => {
                let (min, max, mode) = (self.number(0)?, self.number(1)?, self.number(2)?);
                let x = dist::sample_triangular(&mut self.interp.rng, min, max, mode);
                self.checked(x)
            }
            SampleLognormal => {
                let (mu, sigma) = (self.number(0)?, self.number(1)?);
                let x = dist::sample_lognormal(&mut self.interp.rng, mu, sigma);
                self.checked(x)
            }
            SampleDistribution => {
                let family = self.string(0)?;
                let (min, max) = (self.number(1)?, self.number(2)?);
                let family = match Distribution::lookup(&family) {
                    Some(d) => d,
                    None => {
                        if self.interp.first_unknown_family(&family) {
                            log::warn!(
                                "sandbox: unknown distribution '{family}', falling back to uniform"
                            );
                        }
                        Distribution::Uniform
                    }
                };
                let x = dist::sample_bounded(&mut self.interp.rng, family, min, max);
                self.checked(x)
            }

            Percentile => {
                let values = self.sorted(0)?;
                let p = self.number(1)?;
                let x = dist::percentile(&values, p);
                self.stat(x)
            }
            Median => {
                let values = self.sorted(0)?;
                let x = dist::percentile(&values, 0.5);
                self.stat(x)
            }
            Mean => {
                let values = self.numbers(0)?;
                let x = dist::mean(&values);
                self.stat(x)
            }
            StandardDeviation => {
                let values = self.numbers(0)?;
                let x = dist::standard_deviation(&values);
                self.stat(x)
            }
            Skewness => {
                let values = self.numbers(0)?;
                let x = dist::skewness(&values);
                self.stat(x)
            }
            Kurtosis => {
                let values = self.numbers(0)?;
                let x = dist::kurtosis(&values);
                self.stat(x)
            }
            Sum => {
                let values = self.numbers(0)?;
                n(values.iter().fold(0.0, |acc, v| acc + v))
            }
            SortAscending => {
                let values = self.sorted(0)?;
                let items = values.into_iter().map(Value::Number).collect();
                self.interp.new_array(items)
            }
            ZScore => {
                let confidence = self.number(0)?;
                let x = z_score(confidence);
                self.checked(x)
            }

            Clamp => n(dist::clamp(self.number(0)?, self.number(1)?, self.number(2)?)),
            IsFinite => Ok(Value::Bool(matches!(self.arg(0), Value::Number(x) if x.is_finite()))),
            IsNaN => Ok(Value::Bool(!matches!(self.arg(0), Value::Number(x) if !x.is_nan()))),
            Error | RangeError => {
                let message = match self.arg(0) {
                    Value::Undefined => String::new(),
                    other => self.interp.stringify(&other)?,
                };
                let mut fields = BTreeMap::new();
                let kind = if builtin == Error { "Error" } else { "RangeError" };
                fields.insert("name".to_string(), Value::str(kind));
                fields.insert("message".to_string(), Value::str(&message));
                self.interp.new_object(fields)
            }
        }
    }

    fn arg(&self, index: usize) -> Value {
        self.args.get(index).cloned().unwrap_or(Value::Undefined)
    }

    fn number(&self, index: usize) -> Result<f64, Fault> {
        match self.args.get(index) {
            Some(Value::Number(x)) => Ok(*x),
            other => Err(self.interp.fault(format!(
                "{} expects a number as argument {}, got {}",
                self.name,
                index + 1,
                other.map_or("nothing", Value::type_name)
            ))),
        }
    }

    fn string(&self, index: usize) -> Result<String, Fault> {
        match self.args.get(index) {
            Some(Value::Str(s)) => Ok(s.to_string()),
            other => Err(self.interp.fault(format!(
                "{} expects a string as argument {}, got {}",
                self.name,
                index + 1,
                other.map_or("nothing", Value::type_name)
            ))),
        }
    }

    fn all_numbers(&self) -> Result<Vec<f64>, Fault> {
        (0..self.args.len()).map(|i| self.number(i)).collect()
    }

    /// Array argument of numbers. Charges one step per element.
    fn numbers(&mut self, index: usize) -> Result<Vec<f64>, Fault> {
        let items = match self.args.get(index) {
            Some(Value::Array(items)) => items.clone(),
            other => {
                return Err(self.interp.fault(format!(
                    "{} expects an array as argument {}, got {}",
                    self.name,
                    index + 1,
                    other.map_or("nothing", Value::type_name)
                )))
            }
        };
        let items = items.borrow();
        self.interp.charge_steps(items.len() as u64)?;
        let mut values = Vec::with_capacity(items.len());
        for item in items.iter() {
            match item {
                Value::Number(x) => values.push(*x),
                other => {
                    return Err(self.interp.fault(format!(
                        "{} expects an array of numbers, found {}",
                        self.name,
                        other.type_name()
                    )))
                }
            }
        }
        Ok(values)
    }

    fn sorted(&mut self, index: usize) -> Result<Vec<f64>, Fault> {
        let values = self.numbers(index)?;
        self.interp.charge_steps(values.len() as u64)?;
        Ok(dist::sorted_ascending(&values))
    }

    fn checked(&self, result: Result<f64, AlgorithmError>) -> Result<Value, Fault> {
        result.map(Value::Number).map_err(|err| {
            let (kind, message) = match err {
                AlgorithmError::InvalidParameter(m) => (FaultKind::InvalidParameter, m),
                AlgorithmError::UnsupportedParameter(m) => (FaultKind::UnsupportedParameter, m),
                AlgorithmError::Stats(e) => (FaultKind::InvalidParameter, e.to_string()),
            };
            self.interp.fault_of(kind, format!("{}: {message}", self.name))
        })
    }

    fn stat(&self, result: Result<f64, StatsError>) -> Result<Value, Fault> {
        result.map(Value::Number).map_err(|err| {
            self.interp
                .fault_of(FaultKind::InvalidParameter, format!("{}: {err}", self.name))
        })
    }
}
