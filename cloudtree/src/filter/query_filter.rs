use super::{CompareOp, Predicate};
use crate::errors::{CloudError, CloudResult};
use crate::geometry::{Bounds, Delta, Point};
use crate::metadata::Metadata;
use crate::schema::{PointRef, Schema};

/// A predicate dimension resolved against the storage schema.
#[derive(Clone, Copy, Debug)]
struct Field {
    index: usize,
    /// Spatial axis when the dimension is `X`, `Y` or `Z`.
    axis: Option<usize>,
}

#[derive(Clone, Debug)]
enum Node {
    Compare {
        field: Field,
        op: CompareOp,
        value: f64,
    },
    In {
        field: Field,
        values: Vec<f64>,
        negate: bool,
    },
    And(Vec<Node>),
    Or(Vec<Node>),
    Not(Box<Node>),
}

impl Node {
    fn compile(predicate: &Predicate, schema: &Schema, xyz: &[usize; 3]) -> CloudResult<Node> {
        let field = |name: &str| -> CloudResult<Field> {
            let index = schema.find(name).ok_or_else(|| {
                CloudError::Filter(format!("unknown dimension {} in filter", name))
            })?;
            Ok(Field {
                index,
                axis: xyz.iter().position(|&i| i == index),
            })
        };

        Ok(match predicate {
            Predicate::Compare { dim, op, value } => Node::Compare {
                field: field(dim)?,
                op: *op,
                value: *value,
            },
            Predicate::In {
                dim,
                values,
                negate,
            } => Node::In {
                field: field(dim)?,
                values: values.clone(),
                negate: *negate,
            },
            Predicate::And(children) => Node::And(
                children
                    .iter()
                    .map(|c| Node::compile(c, schema, xyz))
                    .collect::<CloudResult<_>>()?,
            ),
            Predicate::Or(children) => Node::Or(
                children
                    .iter()
                    .map(|c| Node::compile(c, schema, xyz))
                    .collect::<CloudResult<_>>()?,
            ),
            Predicate::Not(inner) => Node::Not(Box::new(Node::compile(inner, schema, xyz)?)),
        })
    }

    /// Exact evaluation. Positional fields read `position`, which is already
    /// in output space.
    fn matches(&self, point: &PointRef<'_>, position: &Point) -> bool {
        let value = |f: &Field| match f.axis {
            Some(axis) => position[axis],
            None => point.get_f64(f.index),
        };

        match self {
            Node::Compare { field, op, value: rhs } => op.test(value(field), *rhs),
            Node::In {
                field,
                values,
                negate,
            } => {
                let v = value(field);
                values.iter().any(|x| *x == v) != *negate
            }
            Node::And(children) => children.iter().all(|c| c.matches(point, position)),
            Node::Or(children) => children.iter().any(|c| c.matches(point, position)),
            Node::Not(inner) => !inner.matches(point, position),
        }
    }

    /// Conservative evaluation over an output-space node extent. Only
    /// positional tests can rule a node out.
    fn possible(&self, extent: &Bounds) -> bool {
        match self {
            Node::Compare { field, op, value } => match field.axis {
                Some(axis) => {
                    let (lo, hi) = extent.range(axis);
                    op.possible(lo, hi, *value)
                }
                None => true,
            },
            Node::In {
                field,
                values,
                negate: false,
            } => match field.axis {
                Some(axis) => {
                    let (lo, hi) = extent.range(axis);
                    values.iter().any(|v| lo <= *v && *v <= hi)
                }
                None => true,
            },
            Node::In { negate: true, .. } => true,
            Node::And(children) => children.iter().all(|c| c.possible(extent)),
            Node::Or(children) => children.iter().any(|c| c.possible(extent)),
            Node::Not(_) => true,
        }
    }
}

/// Spatial and attribute filter of one query.
///
/// # Two levels
/// * [`Filter::check_bounds`] decides whether a tree node may hold any
///   matching point. It never rejects a node that holds one.
/// * [`Filter::check_point`] decides exactly whether one point's attributes
///   match. Spatial containment is tested separately with
///   [`Filter::contains`].
///
/// Query bounds are kept in index space so stored positions are compared
/// without transforming them. Attribute tests on `X`, `Y` or `Z` see output
/// space values, which is what the caller wrote them against.
#[derive(Clone, Debug)]
pub struct Filter {
    bounds: Bounds,
    predicate: Option<Node>,
    delta: Option<Delta>,
    mid: Point,
}

impl Filter {
    /// Builds a filter from index-space query bounds, already intersected
    /// with the index cube, and an optional predicate over the storage
    /// schema.
    pub fn new(
        metadata: &Metadata,
        local_bounds: Bounds,
        predicate: Option<&Predicate>,
        delta: Option<Delta>,
    ) -> CloudResult<Filter> {
        let schema = metadata.schema();
        let xyz = schema.positional()?;
        let predicate = predicate
            .map(|p| Node::compile(p, schema, &xyz))
            .transpose()?;

        Ok(Filter {
            bounds: local_bounds,
            predicate,
            delta,
            mid: metadata.mid(),
        })
    }

    /// Index-space query bounds.
    pub fn bounds(&self) -> &Bounds {
        &self.bounds
    }

    /// Whether `node` may contain a matching point.
    pub fn check_bounds(&self, node: &Bounds) -> bool {
        if !node.overlaps(&self.bounds, true) {
            return false;
        }
        match &self.predicate {
            Some(p) => p.possible(&self.to_output(node)),
            None => true,
        }
    }

    /// Exact spatial test of an index-space position.
    #[inline]
    pub fn contains(&self, point: &Point) -> bool {
        self.bounds.contains(point)
    }

    /// Exact attribute test. `point` is the index-space position of the row.
    pub fn check_point(&self, point_ref: &PointRef<'_>, point: &Point) -> bool {
        match &self.predicate {
            Some(p) => {
                let position = match &self.delta {
                    Some(delta) => delta.apply_point(point, &self.mid),
                    None => *point,
                };
                p.matches(point_ref, &position)
            }
            None => true,
        }
    }

    fn to_output(&self, node: &Bounds) -> Bounds {
        match &self.delta {
            Some(delta) => delta.globalize(node, &self.mid),
            None => *node,
        }
    }
}
