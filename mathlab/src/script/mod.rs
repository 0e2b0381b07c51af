//! Plot-script execution
//!
//! Instead of executing code written by the model, the model writes JSON
//! commands that are interpreted here in pure Rust. A script runs against a
//! fresh [`Namespace`] in which `np` (numeric arrays) and `plt` (plotting)
//! are pre-bound, and is expected to leave a [`Figure`] bound to `fig`.
//!
//! Nothing here can reach files, the network, processes, or the
//! environment. Script size, command count, array length, expression depth
//! and wall-clock time are all bounded by [`SandboxConfig`].

mod expr;
mod figure;

pub use expr::{evaluate, ExprError};
pub use figure::{
    Annotation, Color, Figure, LineStyle, Orientation, RefLine, Series, SeriesKind, PALETTE,
};

use crate::SandboxConfig;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::debug;

/// Name the chart handle is expected under
pub const FIGURE_BINDING: &str = "fig";

const RESERVED: [&str; 2] = ["np", "plt"];

/// Errors from plot-script execution
#[derive(Error, Debug)]
pub enum ScriptError {
    #[error("script is {size} bytes, limit is {limit}")]
    TooLarge { size: usize, limit: usize },

    #[error("script contains no commands")]
    Empty,

    #[error("could not parse script at line {line}, column {column}: {message}")]
    Parse {
        line: usize,
        column: usize,
        message: String,
    },

    #[error("script has {count} commands, limit is {limit}")]
    TooManyCommands { count: usize, limit: usize },

    #[error("script exceeded its {0} ms time budget")]
    Timeout(u64),

    #[error("command {index} ({op}): {source}")]
    Command {
        index: usize,
        op: &'static str,
        #[source]
        source: CommandError,
    },

    #[error("script execution aborted: {0}")]
    Aborted(String),
}

impl ScriptError {
    /// True when the text could not be read as a script at all, as opposed
    /// to a script that ran and failed
    pub fn is_unreadable(&self) -> bool {
        matches!(self, ScriptError::Empty | ScriptError::Parse { .. })
    }
}

/// Errors raised by a single command
#[derive(Error, Debug)]
pub enum CommandError {
    #[error("in expression '{expr}': {source}")]
    Expr {
        expr: String,
        #[source]
        source: ExprError,
    },

    #[error("'{0}' is pre-bound and cannot be reassigned")]
    Reserved(String),

    #[error("'{0}' is not a valid name")]
    InvalidName(String),

    #[error("'{0}' is not a figure; create one with {{\"op\": \"figure\"}} first")]
    NotAFigure(String),

    #[error("invalid color '{0}'")]
    InvalidColor(String),

    #[error("x has {x} points but y has {y}")]
    LengthMismatch { x: usize, y: usize },

    #[error("the figure would hold {total} points, more than the limit of {limit}")]
    TooManyPoints { total: usize, limit: usize },

    #[error("{0}")]
    InvalidArgument(String),
}

/// A numeric value: one number or a 1-D array
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Scalar(f64),
    Array(Vec<f64>),
}

impl Value {
    pub fn len(&self) -> usize {
        match self {
            Value::Scalar(_) => 1,
            Value::Array(xs) => xs.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Apply `f` element-wise
    pub fn map(&self, f: impl Fn(f64) -> f64) -> Value {
        match self {
            Value::Scalar(v) => Value::Scalar(f(*v)),
            Value::Array(xs) => Value::Array(xs.iter().map(|v| f(*v)).collect()),
        }
    }

    /// Combine element-wise, broadcasting scalars against arrays
    pub fn zip_with(&self, other: &Value, f: impl Fn(f64, f64) -> f64) -> Result<Value, ExprError> {
        match (self, other) {
            (Value::Scalar(a), Value::Scalar(b)) => Ok(Value::Scalar(f(*a, *b))),
            (Value::Scalar(a), Value::Array(bs)) => {
                Ok(Value::Array(bs.iter().map(|b| f(*a, *b)).collect()))
            }
            (Value::Array(xs), Value::Scalar(b)) => {
                Ok(Value::Array(xs.iter().map(|a| f(*a, *b)).collect()))
            }
            (Value::Array(xs), Value::Array(ys)) => {
                if xs.len() != ys.len() {
                    return Err(ExprError::ShapeMismatch(xs.len(), ys.len()));
                }
                Ok(Value::Array(
                    xs.iter().zip(ys).map(|(a, b)| f(*a, *b)).collect(),
                ))
            }
        }
    }

    /// Expand to `n` points: scalars repeat, arrays must already have `n`
    fn into_points(self, n: usize) -> Option<Vec<f64>> {
        match self {
            Value::Scalar(v) => Some(vec![v; n]),
            Value::Array(xs) if xs.len() == n => Some(xs),
            Value::Array(_) => None,
        }
    }
}

/// What a name is bound to
#[derive(Debug, Clone, PartialEq)]
pub enum Binding {
    /// The `np` library
    Numeric,
    /// The `plt` library
    Plot,
    Value(Value),
    Figure(Figure),
}

/// Bindings visible to a script
#[derive(Debug, Clone)]
pub struct Namespace {
    bindings: HashMap<String, Binding>,
}

impl Namespace {
    /// A namespace with only `np` and `plt` bound
    pub fn fresh() -> Self {
        let mut bindings = HashMap::new();
        bindings.insert("np".to_string(), Binding::Numeric);
        bindings.insert("plt".to_string(), Binding::Plot);
        Self { bindings }
    }

    pub fn get(&self, name: &str) -> Option<&Binding> {
        self.bindings.get(name)
    }

    /// The figure bound to `name`, if `name` is bound to a figure
    pub fn figure(&self, name: &str) -> Option<&Figure> {
        match self.bindings.get(name) {
            Some(Binding::Figure(fig)) => Some(fig),
            _ => None,
        }
    }

    /// Remove and return the figure bound to `name`
    pub fn take_figure(&mut self, name: &str) -> Option<Figure> {
        match self.bindings.remove(name) {
            Some(Binding::Figure(fig)) => Some(fig),
            Some(other) => {
                self.bindings.insert(name.to_string(), other);
                None
            }
            None => None,
        }
    }

    /// Sorted names of everything bound, including `np` and `plt`
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.bindings.keys().map(|k| k.as_str()).collect();
        names.sort_unstable();
        names
    }

    pub fn bind_value(&mut self, name: &str, value: Value) -> Result<(), CommandError> {
        self.bind(name, Binding::Value(value))
    }

    fn bind(&mut self, name: &str, binding: Binding) -> Result<(), CommandError> {
        check_name(name)?;
        self.bindings.insert(name.to_string(), binding);
        Ok(())
    }

    fn figure_mut(&mut self, name: &str) -> Result<&mut Figure, CommandError> {
        match self.bindings.get_mut(name) {
            Some(Binding::Figure(fig)) => Ok(fig),
            _ => Err(CommandError::NotAFigure(name.to_string())),
        }
    }
}

fn check_name(name: &str) -> Result<(), CommandError> {
    if RESERVED.contains(&name) {
        return Err(CommandError::Reserved(name.to_string()));
    }
    let mut chars = name.chars();
    let valid = chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_');
    if !valid {
        return Err(CommandError::InvalidName(name.to_string()));
    }
    Ok(())
}

/// An expression given either as source text or as a literal
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ExprField {
    Number(f64),
    List(Vec<f64>),
    Text(String),
}

impl ExprField {
    fn evaluate(&self, ns: &Namespace, limits: &SandboxConfig) -> Result<Value, CommandError> {
        match self {
            ExprField::Number(n) => Ok(Value::Scalar(*n)),
            ExprField::List(xs) => {
                if xs.len() > limits.max_points {
                    return Err(CommandError::Expr {
                        expr: "[...]".to_string(),
                        source: ExprError::TooLarge {
                            len: xs.len(),
                            limit: limits.max_points,
                        },
                    });
                }
                Ok(Value::Array(xs.clone()))
            }
            ExprField::Text(src) => evaluate(src, ns, limits).map_err(|source| CommandError::Expr {
                expr: src.clone(),
                source,
            }),
        }
    }

    fn scalar(&self, ns: &Namespace, limits: &SandboxConfig, what: &str) -> Result<f64, CommandError> {
        match self.evaluate(ns, limits)? {
            Value::Scalar(v) => Ok(v),
            Value::Array(xs) if xs.len() == 1 => Ok(xs[0]),
            Value::Array(_) => Err(CommandError::InvalidArgument(format!(
                "{} must be a single number",
                what
            ))),
        }
    }
}

/// A single plot-script command
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case", deny_unknown_fields)]
pub enum Command {
    /// Bind an expression: {"op": "let", "name": "x", "expr": "np.linspace(-10, 10, 200)"}
    Let { name: String, expr: ExprField },

    /// Create a chart handle: {"op": "figure", "store": "fig", "title": "..."}
    Figure {
        #[serde(default = "default_figure")]
        store: String,
        #[serde(default)]
        title: Option<String>,
        #[serde(default)]
        xlabel: Option<String>,
        #[serde(default)]
        ylabel: Option<String>,
    },

    /// Line series: {"op": "plot", "x": "x", "y": "3*x - 2"}
    Plot {
        #[serde(default = "default_figure")]
        fig: String,
        #[serde(default)]
        x: Option<ExprField>,
        y: ExprField,
        #[serde(default)]
        label: Option<String>,
        #[serde(default)]
        color: Option<String>,
        #[serde(default)]
        style: LineStyle,
    },

    /// Point series: {"op": "scatter", "x": "[1, 2]", "y": "[3, 4]"}
    Scatter {
        #[serde(default = "default_figure")]
        fig: String,
        x: ExprField,
        y: ExprField,
        #[serde(default)]
        label: Option<String>,
        #[serde(default)]
        color: Option<String>,
    },

    /// Bars: {"op": "bar", "x": "[1, 2, 3]", "height": "[4, 5, 6]"}
    Bar {
        #[serde(default = "default_figure")]
        fig: String,
        x: ExprField,
        height: ExprField,
        #[serde(default)]
        label: Option<String>,
        #[serde(default)]
        color: Option<String>,
    },

    /// Horizontal reference line: {"op": "axhline", "y": "0"}
    Axhline {
        #[serde(default = "default_figure")]
        fig: String,
        #[serde(default = "default_zero")]
        y: ExprField,
        #[serde(default)]
        label: Option<String>,
        #[serde(default)]
        color: Option<String>,
    },

    /// Vertical reference line: {"op": "axvline", "x": "0"}
    Axvline {
        #[serde(default = "default_figure")]
        fig: String,
        #[serde(default = "default_zero")]
        x: ExprField,
        #[serde(default)]
        label: Option<String>,
        #[serde(default)]
        color: Option<String>,
    },

    /// Annotation: {"op": "text", "x": "2", "y": "4", "text": "vertex"}
    Text {
        #[serde(default = "default_figure")]
        fig: String,
        x: ExprField,
        y: ExprField,
        text: String,
    },

    /// Titles: {"op": "labels", "title": "...", "xlabel": "x", "ylabel": "y"}
    Labels {
        #[serde(default = "default_figure")]
        fig: String,
        #[serde(default)]
        title: Option<String>,
        #[serde(default)]
        xlabel: Option<String>,
        #[serde(default)]
        ylabel: Option<String>,
    },

    /// Grid lines: {"op": "grid", "visible": true}
    Grid {
        #[serde(default = "default_figure")]
        fig: String,
        #[serde(default = "default_true")]
        visible: bool,
    },

    /// Show the legend: {"op": "legend"}
    Legend {
        #[serde(default = "default_figure")]
        fig: String,
    },

    /// Axis limits: {"op": "limits", "x": [-10, 10], "y": [-5, 5]}
    Limits {
        #[serde(default = "default_figure")]
        fig: String,
        #[serde(default)]
        x: Option<[f64; 2]>,
        #[serde(default)]
        y: Option<[f64; 2]>,
    },

    /// Equal scaling on both axes: {"op": "aspect_equal"}
    AspectEqual {
        #[serde(default = "default_figure")]
        fig: String,
    },
}

fn default_figure() -> String {
    FIGURE_BINDING.to_string()
}

fn default_zero() -> ExprField {
    ExprField::Number(0.0)
}

fn default_true() -> bool {
    true
}

impl Command {
    pub fn op(&self) -> &'static str {
        match self {
            Command::Let { .. } => "let",
            Command::Figure { .. } => "figure",
            Command::Plot { .. } => "plot",
            Command::Scatter { .. } => "scatter",
            Command::Bar { .. } => "bar",
            Command::Axhline { .. } => "axhline",
            Command::Axvline { .. } => "axvline",
            Command::Text { .. } => "text",
            Command::Labels { .. } => "labels",
            Command::Grid { .. } => "grid",
            Command::Legend { .. } => "legend",
            Command::Limits { .. } => "limits",
            Command::AspectEqual { .. } => "aspect_equal",
        }
    }
}

/// Parse script text: a JSON array of commands, or JSON objects separated by
/// whitespace (usually one per line). Lines starting with `//` or `#` are
/// comments.
pub fn parse_script(code: &str) -> Result<Vec<Command>, ScriptError> {
    // blank out comments line by line so parse errors keep their line numbers
    let cleaned: String = code
        .lines()
        .map(|line| {
            let t = line.trim_start();
            if t.starts_with("//") || t.starts_with('#') {
                ""
            } else {
                line
            }
        })
        .collect::<Vec<_>>()
        .join("\n");

    let parse_err = |e: serde_json::Error| ScriptError::Parse {
        line: e.line(),
        column: e.column(),
        message: e.to_string(),
    };

    let commands: Vec<Command> = if cleaned.trim_start().starts_with('[') {
        serde_json::from_str(&cleaned).map_err(parse_err)?
    } else {
        serde_json::Deserializer::from_str(&cleaned)
            .into_iter::<Command>()
            .collect::<Result<_, _>>()
            .map_err(parse_err)?
    };

    if commands.is_empty() {
        return Err(ScriptError::Empty);
    }
    Ok(commands)
}

/// Run a script against a fresh namespace and return the final bindings
pub fn run(code: &str, limits: &SandboxConfig) -> Result<Namespace, ScriptError> {
    if code.len() > limits.max_script_bytes {
        return Err(ScriptError::TooLarge {
            size: code.len(),
            limit: limits.max_script_bytes,
        });
    }

    let commands = parse_script(code)?;
    if commands.len() > limits.max_commands {
        return Err(ScriptError::TooManyCommands {
            count: commands.len(),
            limit: limits.max_commands,
        });
    }

    let mut executor = ScriptExecutor::new(limits.clone());
    executor.execute_commands(&commands)?;
    Ok(executor.into_namespace())
}

/// Executes commands against a namespace
pub struct ScriptExecutor {
    namespace: Namespace,
    limits: SandboxConfig,
    started: Instant,
}

impl ScriptExecutor {
    pub fn new(limits: SandboxConfig) -> Self {
        Self {
            namespace: Namespace::fresh(),
            limits,
            started: Instant::now(),
        }
    }

    pub fn into_namespace(self) -> Namespace {
        self.namespace
    }

    /// Execute commands in order, stopping at the first failure
    pub fn execute_commands(&mut self, commands: &[Command]) -> Result<(), ScriptError> {
        let budget = Duration::from_millis(self.limits.timeout_ms);
        for (i, cmd) in commands.iter().enumerate() {
            if self.started.elapsed() > budget {
                return Err(ScriptError::Timeout(self.limits.timeout_ms));
            }
            self.execute_one(cmd).map_err(|source| ScriptError::Command {
                index: i + 1,
                op: cmd.op(),
                source,
            })?;
        }
        debug!(
            commands = commands.len(),
            elapsed_us = self.started.elapsed().as_micros() as u64,
            "Plot script finished"
        );
        Ok(())
    }

    fn eval(&self, field: &ExprField) -> Result<Value, CommandError> {
        field.evaluate(&self.namespace, &self.limits)
    }

    fn eval_scalar(&self, field: &ExprField, what: &str) -> Result<f64, CommandError> {
        field.scalar(&self.namespace, &self.limits, what)
    }

    /// Evaluate an x/y pair into equal-length point lists
    fn eval_points(
        &self,
        x: Option<&ExprField>,
        y: &ExprField,
    ) -> Result<(Vec<f64>, Vec<f64>), CommandError> {
        let y = self.eval(y)?;
        let x = match x {
            Some(x) => self.eval(x)?,
            // matplotlib plots y against its indices when x is omitted
            None => Value::Array((0..y.len()).map(|i| i as f64).collect()),
        };
        let n = x.len().max(y.len());
        let (xl, yl) = (x.len(), y.len());
        match (x.into_points(n), y.into_points(n)) {
            (Some(xs), Some(ys)) => Ok((xs, ys)),
            _ => Err(CommandError::LengthMismatch { x: xl, y: yl }),
        }
    }

    /// Add a series, keeping the figure's total point count within limits
    fn push_series(&mut self, fig: &str, series: Series) -> Result<(), CommandError> {
        let limit = self.limits.max_figure_points;
        let figure = self.namespace.figure_mut(fig)?;
        let total = figure.series.iter().map(|s| s.xs.len()).sum::<usize>() + series.xs.len();
        if total > limit {
            return Err(CommandError::TooManyPoints { total, limit });
        }
        figure.series.push(series);
        Ok(())
    }

    fn execute_one(&mut self, cmd: &Command) -> Result<(), CommandError> {
        match cmd {
            Command::Let { name, expr } => {
                check_name(name)?;
                let value = self.eval(expr)?;
                self.namespace.bind_value(name, value)
            }

            Command::Figure {
                store,
                title,
                xlabel,
                ylabel,
            } => {
                let fig = Figure {
                    title: title.clone(),
                    xlabel: xlabel.clone(),
                    ylabel: ylabel.clone(),
                    ..Figure::new()
                };
                self.namespace.bind(store, Binding::Figure(fig))
            }

            Command::Plot {
                fig,
                x,
                y,
                label,
                color,
                style,
            } => {
                let (xs, ys) = self.eval_points(x.as_ref(), y)?;
                let color = parse_color(color)?;
                self.push_series(
                    fig,
                    Series {
                        kind: SeriesKind::Line,
                        xs,
                        ys,
                        label: label.clone(),
                        color,
                        style: *style,
                    },
                )
            }

            Command::Scatter {
                fig,
                x,
                y,
                label,
                color,
            } => {
                let (xs, ys) = self.eval_points(Some(x), y)?;
                let color = parse_color(color)?;
                self.push_series(
                    fig,
                    Series {
                        kind: SeriesKind::Scatter,
                        xs,
                        ys,
                        label: label.clone(),
                        color,
                        style: LineStyle::Solid,
                    },
                )
            }

            Command::Bar {
                fig,
                x,
                height,
                label,
                color,
            } => {
                let (xs, ys) = self.eval_points(Some(x), height)?;
                let color = parse_color(color)?;
                self.push_series(
                    fig,
                    Series {
                        kind: SeriesKind::Bar,
                        xs,
                        ys,
                        label: label.clone(),
                        color,
                        style: LineStyle::Solid,
                    },
                )
            }

            Command::Axhline {
                fig,
                y,
                label,
                color,
            } => {
                let value = self.eval_scalar(y, "axhline y")?;
                self.push_ref_line(fig, Orientation::Horizontal, value, label, color)
            }

            Command::Axvline {
                fig,
                x,
                label,
                color,
            } => {
                let value = self.eval_scalar(x, "axvline x")?;
                self.push_ref_line(fig, Orientation::Vertical, value, label, color)
            }

            Command::Text { fig, x, y, text } => {
                let x = self.eval_scalar(x, "text x")?;
                let y = self.eval_scalar(y, "text y")?;
                self.namespace.figure_mut(fig)?.annotations.push(Annotation {
                    x,
                    y,
                    text: text.clone(),
                });
                Ok(())
            }

            Command::Labels {
                fig,
                title,
                xlabel,
                ylabel,
            } => {
                let figure = self.namespace.figure_mut(fig)?;
                if title.is_some() {
                    figure.title = title.clone();
                }
                if xlabel.is_some() {
                    figure.xlabel = xlabel.clone();
                }
                if ylabel.is_some() {
                    figure.ylabel = ylabel.clone();
                }
                Ok(())
            }

            Command::Grid { fig, visible } => {
                self.namespace.figure_mut(fig)?.grid = *visible;
                Ok(())
            }

            Command::Legend { fig } => {
                self.namespace.figure_mut(fig)?.legend = true;
                Ok(())
            }

            Command::Limits { fig, x, y } => {
                let xlim = x.map(|r| check_range("x", r)).transpose()?;
                let ylim = y.map(|r| check_range("y", r)).transpose()?;
                let figure = self.namespace.figure_mut(fig)?;
                if xlim.is_some() {
                    figure.xlim = xlim;
                }
                if ylim.is_some() {
                    figure.ylim = ylim;
                }
                Ok(())
            }

            Command::AspectEqual { fig } => {
                self.namespace.figure_mut(fig)?.equal_aspect = true;
                Ok(())
            }
        }
    }

    fn push_ref_line(
        &mut self,
        fig: &str,
        orientation: Orientation,
        value: f64,
        label: &Option<String>,
        color: &Option<String>,
    ) -> Result<(), CommandError> {
        if !value.is_finite() {
            return Err(CommandError::InvalidArgument(
                "reference line position must be finite".to_string(),
            ));
        }
        let color = parse_color(color)?;
        self.namespace.figure_mut(fig)?.ref_lines.push(RefLine {
            orientation,
            value,
            label: label.clone(),
            color,
        });
        Ok(())
    }
}

fn parse_color(raw: &Option<String>) -> Result<Option<Color>, CommandError> {
    match raw {
        None => Ok(None),
        Some(s) => Color::parse(s)
            .map(Some)
            .ok_or_else(|| CommandError::InvalidColor(s.clone())),
    }
}

fn check_range(axis: &str, [lo, hi]: [f64; 2]) -> Result<(f64, f64), CommandError> {
    if !lo.is_finite() || !hi.is_finite() || lo >= hi {
        return Err(CommandError::InvalidArgument(format!(
            "{} limits must be finite with low < high, got [{}, {}]",
            axis, lo, hi
        )));
    }
    Ok((lo, hi))
}
