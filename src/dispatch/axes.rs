//! Cross-product expansion of sweep axes into concrete generation points.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::core::{clean_param_name, DispatchError, GenerationParams};

/// Axis name whose values are `find=replace` prompt substitutions.
pub const PROMPT_REPLACE: &str = "promptreplace";

/// One declared parameter axis.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SweepAxis {
    /// Parameter the axis varies.
    pub param: String,
    /// Values in textual form.
    pub values: Vec<String>,
}

impl SweepAxis {
    /// Build an axis from any string-like values.
    pub fn new<I, S>(param: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            param: param.into(),
            values: values.into_iter().map(Into::into).collect(),
        }
    }
}

/// One concrete point of the cross product.
#[derive(Debug, Clone, PartialEq)]
pub struct SweepPoint {
    /// Position in expansion order.
    pub index: usize,
    /// `(param, value)` for each axis, in axis order.
    pub coords: Vec<(String, String)>,
    /// Parameters with every coordinate applied.
    pub params: GenerationParams,
    /// Relative file stem, one directory level per axis.
    pub path: String,
}

/// Filesystem-safe rendering of one axis value.
#[must_use]
pub fn path_segment(value: &str) -> String {
    let cleaned: String = value
        .trim()
        .chars()
        .map(|c| {
            if c.is_alphanumeric() || matches!(c, '-' | '_' | ' ') {
                c
            } else {
                '_'
            }
        })
        .collect();
    if cleaned.is_empty() {
        "_".to_string()
    } else {
        cleaned
    }
}

fn validate_axes(axes: &[SweepAxis], max_points: usize) -> Result<usize, DispatchError> {
    if axes.is_empty() {
        return Err(DispatchError::InvalidData("sweep needs at least one axis".into()));
    }
    let mut total: usize = 1;
    for axis in axes {
        if axis.values.is_empty() {
            return Err(DispatchError::InvalidData(format!(
                "axis `{}` has no values",
                axis.param
            )));
        }
        let mut seen = HashSet::new();
        for value in &axis.values {
            if !seen.insert(path_segment(value)) {
                return Err(DispatchError::InvalidData(format!(
                    "axis `{}` repeats value `{value}`",
                    axis.param
                )));
            }
        }
        total = total
            .checked_mul(axis.values.len())
            .filter(|&n| n <= max_points)
            .ok_or_else(|| DispatchError::InvalidData("sweep has too many points".into()))?;
    }
    Ok(total)
}

fn build_point(
    index: usize,
    base: &GenerationParams,
    coords: Vec<(String, String)>,
) -> Result<SweepPoint, DispatchError> {
    let mut params = base.clone();
    let mut replacements = Vec::new();
    for (param, value) in &coords {
        if clean_param_name(param) == PROMPT_REPLACE {
            let (find, replace) = value.split_once('=').ok_or_else(|| {
                DispatchError::InvalidData(format!("prompt replace `{value}` must be `find=replace`"))
            })?;
            replacements.push((find.trim().to_string(), replace.trim().to_string()));
        } else {
            params.apply(param, value)?;
        }
    }
    for (find, replace) in &replacements {
        params.replace_in_prompts(find, replace);
    }
    let path = coords
        .iter()
        .map(|(_, value)| path_segment(value))
        .collect::<Vec<_>>()
        .join("/");
    Ok(SweepPoint {
        index,
        coords,
        params,
        path,
    })
}

/// Expand `axes` over `base` into every combination.
///
/// The last axis varies fastest. Prompt replacements apply after all other
/// substitutions of a point. The point count is checked against `max_points`
/// before anything is built.
///
/// # Errors
///
/// `InvalidData` for missing or empty axes, repeated values, more than
/// `max_points` combinations, or values that do not parse for their parameter.
pub fn expand_axes(
    base: &GenerationParams,
    axes: &[SweepAxis],
    max_points: usize,
) -> Result<Vec<SweepPoint>, DispatchError> {
    let total = validate_axes(axes, max_points)?;
    let mut points = Vec::with_capacity(total);
    let mut cursor = vec![0usize; axes.len()];
    for index in 0..total {
        let coords = axes
            .iter()
            .zip(&cursor)
            .map(|(axis, &i)| (axis.param.clone(), axis.values[i].clone()))
            .collect();
        points.push(build_point(index, base, coords)?);
        for (slot, axis) in cursor.iter_mut().zip(axes).rev() {
            *slot += 1;
            if *slot < axis.values.len() {
                break;
            }
            *slot = 0;
        }
    }
    Ok(points)
}
