use super::{CompareOp, Predicate};

/// Starts a fluent predicate on the dimension called `name`.
///
/// ```rust
/// use cloudtree::filter::dim;
///
/// let p = dim("Intensity").between(10, 20).or(dim("Classification").is_in([2, 6]));
/// assert_eq!(p.to_string(), "((Intensity >= 10 && Intensity <= 20) || Classification in [2, 6])");
/// ```
pub fn dim(name: &str) -> DimFilter {
    DimFilter {
        name: name.to_string(),
    }
}

/// Combines predicates with logical AND.
pub fn and(predicates: Vec<Predicate>) -> Predicate {
    Predicate::And(predicates)
}

/// Combines predicates with logical OR.
pub fn or(predicates: Vec<Predicate>) -> Predicate {
    Predicate::Or(predicates)
}

/// Negates a predicate.
pub fn not(predicate: Predicate) -> Predicate {
    Predicate::Not(Box::new(predicate))
}

/// Builder for tests on one dimension. Values are compared as `f64`.
pub struct DimFilter {
    name: String,
}

impl DimFilter {
    fn compare<T: Into<f64>>(self, op: CompareOp, value: T) -> Predicate {
        Predicate::Compare {
            dim: self.name,
            op,
            value: value.into(),
        }
    }

    #[inline]
    pub fn eq<T: Into<f64>>(self, value: T) -> Predicate {
        self.compare(CompareOp::Eq, value)
    }

    #[inline]
    pub fn ne<T: Into<f64>>(self, value: T) -> Predicate {
        self.compare(CompareOp::Ne, value)
    }

    #[inline]
    pub fn gt<T: Into<f64>>(self, value: T) -> Predicate {
        self.compare(CompareOp::Gt, value)
    }

    #[inline]
    pub fn gte<T: Into<f64>>(self, value: T) -> Predicate {
        self.compare(CompareOp::Gte, value)
    }

    #[inline]
    pub fn lt<T: Into<f64>>(self, value: T) -> Predicate {
        self.compare(CompareOp::Lt, value)
    }

    #[inline]
    pub fn lte<T: Into<f64>>(self, value: T) -> Predicate {
        self.compare(CompareOp::Lte, value)
    }

    /// Inclusive range test.
    pub fn between<T: Into<f64>>(self, lower: T, upper: T) -> Predicate {
        let name = self.name;
        Predicate::And(vec![
            dim(&name).gte(lower),
            DimFilter { name }.lte(upper),
        ])
    }

    pub fn is_in<T: Into<f64>>(self, values: impl IntoIterator<Item = T>) -> Predicate {
        Predicate::In {
            dim: self.name,
            values: values.into_iter().map(Into::into).collect(),
            negate: false,
        }
    }

    pub fn not_in<T: Into<f64>>(self, values: impl IntoIterator<Item = T>) -> Predicate {
        Predicate::In {
            dim: self.name,
            values: values.into_iter().map(Into::into).collect(),
            negate: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_comparisons() {
        assert_eq!(dim("Intensity").gt(5u16).to_string(), "Intensity > 5");
        assert_eq!(dim("Intensity").lte(5.5).to_string(), "Intensity <= 5.5");
        assert_eq!(dim("Z").ne(-1).to_string(), "Z != -1");
    }

    #[test]
    fn test_chaining_flattens() {
        let p = dim("A").eq(1).and(dim("B").eq(2)).and(dim("C").eq(3));
        match p {
            Predicate::And(children) => assert_eq!(children.len(), 3),
            other => panic!("unexpected {}", other),
        }
    }

    #[test]
    fn test_free_functions() {
        let p = not(or(vec![dim("A").eq(1), dim("B").not_in([1, 2])]));
        assert_eq!(p.to_string(), "!((A == 1 || B not in [1, 2]))");
        assert_eq!(and(vec![dim("A").eq(1)]).dims(), vec!["A"]);
    }
}
