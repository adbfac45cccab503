//! Structural shapes and the fingerprint fold.
//!
//! Every message type carries a [`Shape`]: the ordered list of its public
//! member names, where array-typed members additionally reference the shape
//! of their element type. The fold in [`fingerprint`] turns a shape into a
//! 64-bit value that is a pure function of member names and shapes, so two
//! independently built processes that agree on their message set converge on
//! the same type ids without a handshake.

/// Ordered structural description of a type's public members.
///
/// Scalars have an empty member list; generated message structs list one
/// [`Member`] per field in declaration order.
#[derive(Debug, Clone)]
pub struct Shape {
    /// Members in declaration order.
    pub members: Vec<Member>,
}

impl Shape {
    /// A shape with no members (scalars, opaque element types).
    pub fn empty() -> Self {
        Self {
            members: Vec::new(),
        }
    }
}

/// One public member of a shape.
#[derive(Debug, Clone, Copy)]
pub struct Member {
    /// The member's declared name.
    pub name: &'static str,
    /// Shape of the element type when this member is an array, `None` otherwise.
    pub element: Option<fn() -> Shape>,
}

/// Types that expose a structural shape.
///
/// Implemented for scalars (empty shape) and for every struct declared
/// through [`message_types!`](crate::message_types).
pub trait Structural {
    /// The ordered public members of this type.
    fn shape() -> Shape;
}

/// Field-position view of a type: scalars contribute only their member name,
/// arrays additionally pull the element type's shape into the fold.
pub trait FieldShape {
    /// Shape of the element type when a field of this type is an array.
    fn element() -> Option<fn() -> Shape> {
        None
    }
}

macro_rules! scalar_shapes {
    ($($ty:ty),* $(,)?) => {
        $(
            impl Structural for $ty {
                fn shape() -> Shape {
                    Shape::empty()
                }
            }

            impl FieldShape for $ty {}
        )*
    };
}

scalar_shapes!(u8, u16, u32, u64, i8, i16, i32, i64, f32, f64, bool, String);

impl<T: Structural> Structural for Vec<T> {
    fn shape() -> Shape {
        Shape::empty()
    }
}

impl<T: Structural> FieldShape for Vec<T> {
    fn element() -> Option<fn() -> Shape> {
        Some(T::shape)
    }
}

/// Compute the structural fingerprint of a shape.
///
/// Each member folds into a running 64-bit integer with wrapping arithmetic:
///
/// ```text
/// hash = hash << 2
/// hash += sum(UTF-16 code units of the member name)
/// hash *= 7
/// ```
///
/// applied across all members in declaration order, recursing into an array
/// member's element shape immediately after folding that member's name. The
/// result depends only on member names and shapes, never on the type's own
/// name or declaration position.
///
/// Renaming a member changes the fingerprint and therefore silently shifts
/// the id table; there is no on-wire schema check. Embedders who want to
/// compare schemas out of band can log the per-type fingerprints from
/// [`TypeTable::entries`](crate::codec::TypeTable::entries).
pub fn fingerprint(shape: &Shape) -> i64 {
    fold(0, shape)
}

fn fold(mut hash: i64, shape: &Shape) -> i64 {
    for member in &shape.members {
        hash = hash.wrapping_shl(2);
        hash = hash.wrapping_add(name_weight(member.name));
        hash = hash.wrapping_mul(7);
        if let Some(element) = member.element {
            hash = fold(hash, &element());
        }
    }
    hash
}

fn name_weight(name: &str) -> i64 {
    name.encode_utf16().map(i64::from).sum()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn member(name: &'static str) -> Member {
        Member {
            name,
            element: None,
        }
    }

    #[test]
    fn test_empty_shape_fingerprint_is_zero() {
        assert_eq!(fingerprint(&Shape::empty()), 0);
    }

    #[test]
    fn test_single_member_fold() {
        // "ab" = 97 + 98 = 195; hash = ((0 << 2) + 195) * 7
        let shape = Shape {
            members: vec![member("ab")],
        };
        assert_eq!(fingerprint(&shape), 195 * 7);
    }

    #[test]
    fn test_member_order_matters() {
        let ab = Shape {
            members: vec![member("a"), member("b")],
        };
        let ba = Shape {
            members: vec![member("b"), member("a")],
        };
        assert_ne!(fingerprint(&ab), fingerprint(&ba));
    }

    #[test]
    fn test_rename_changes_fingerprint() {
        let value = Shape {
            members: vec![member("value")],
        };
        let count = Shape {
            members: vec![member("count")],
        };
        assert_ne!(fingerprint(&value), fingerprint(&count));
    }

    #[test]
    fn test_fingerprint_is_deterministic() {
        let shape = Shape {
            members: vec![member("value"), member("count"), member("square")],
        };
        assert_eq!(fingerprint(&shape), fingerprint(&shape.clone()));
    }

    #[test]
    fn test_array_member_recurses_into_element() {
        fn element() -> Shape {
            Shape {
                members: vec![member("inner")],
            }
        }

        let plain = Shape {
            members: vec![member("items")],
        };
        let array = Shape {
            members: vec![Member {
                name: "items",
                element: Some(element),
            }],
        };
        assert_ne!(fingerprint(&plain), fingerprint(&array));
    }

    #[test]
    fn test_scalar_element_adds_nothing() {
        // An array of scalars folds identically to a plain member: the
        // element shape is empty.
        let plain = Shape {
            members: vec![member("bytes")],
        };
        let array = Shape {
            members: vec![Member {
                name: "bytes",
                element: Some(u8::shape),
            }],
        };
        assert_eq!(fingerprint(&plain), fingerprint(&array));
    }

    #[test]
    fn test_scalars_have_empty_shapes() {
        assert!(u8::shape().members.is_empty());
        assert!(String::shape().members.is_empty());
        assert!(<Vec<u32>>::shape().members.is_empty());
    }

    #[test]
    fn test_vec_field_exposes_element_shape() {
        assert!(<Vec<u8> as FieldShape>::element().is_some());
        assert!(<u32 as FieldShape>::element().is_none());
    }
}
