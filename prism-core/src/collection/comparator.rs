//! Ordering strategies for collections.

use std::cmp::Ordering;
use std::fmt;
use std::rc::Rc;

use crate::record::Record;

/// Decides the order of a collection's members.
///
/// When a collection has a comparator it is the only thing that decides
/// member order: explicit insertion positions are ignored.
#[derive(Clone)]
pub enum Comparator {
    /// Order by one attribute, ascending. Records missing the attribute sort
    /// after all records that have it. Ties keep their previous order.
    Attribute(String),
    /// Order with an arbitrary function.
    Function(Rc<dyn Fn(&Record, &Record) -> Ordering>),
}

impl Comparator {
    /// Order by the named attribute.
    pub fn attribute(name: impl Into<String>) -> Self {
        Comparator::Attribute(name.into())
    }

    /// Order with a function.
    ///
    /// The function must not read or mutate the collection being sorted.
    /// Mutating it is rejected with a reentrancy error.
    pub fn by<F>(f: F) -> Self
    where
        F: Fn(&Record, &Record) -> Ordering + 'static,
    {
        Comparator::Function(Rc::new(f))
    }

    /// Compare two records.
    pub fn compare(&self, a: &Record, b: &Record) -> Ordering {
        match self {
            Comparator::Attribute(name) => a.with_attributes(|x| {
                b.with_attributes(|y| match (x.get(name), y.get(name)) {
                    (Some(l), Some(r)) => l.compare(r),
                    (Some(_), None) => Ordering::Less,
                    (None, Some(_)) => Ordering::Greater,
                    (None, None) => Ordering::Equal,
                })
            }),
            Comparator::Function(f) => f(a, b),
        }
    }
}

impl fmt::Debug for Comparator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Comparator::Attribute(name) => f.debug_tuple("Attribute").field(name).finish(),
            Comparator::Function(_) => f.write_str("Function(..)"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attrs;

    #[test]
    fn attribute_comparator_puts_missing_last() {
        let a = Record::new(attrs! { "id" => 1, "title" => "b" }).unwrap();
        let b = Record::new(attrs! { "id" => 2, "title" => "a" }).unwrap();
        let c = Record::new(attrs! { "id" => 3 }).unwrap();

        let cmp = Comparator::attribute("title");
        assert_eq!(cmp.compare(&a, &b), Ordering::Greater);
        assert_eq!(cmp.compare(&a, &c), Ordering::Less);
        assert_eq!(cmp.compare(&c, &c), Ordering::Equal);
    }

    #[test]
    fn function_comparator() {
        let a = Record::new(attrs! { "id" => 1 }).unwrap();
        let b = Record::new(attrs! { "id" => 2 }).unwrap();

        let desc = Comparator::by(|x, y| y.id().cmp(x.id()));
        assert_eq!(desc.compare(&a, &b), Ordering::Greater);
    }
}
