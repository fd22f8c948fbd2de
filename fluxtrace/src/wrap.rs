// Copyright Andeya Lee 2024
//
// Use of this source code is governed by an MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT.
//! Identity-preserving wrapping.

/// A value that may already be a `W`.
pub trait MaybeWrapped<W>: Sized {
    /// Returns the value as a `W` when it already is one, otherwise gives it back.
    fn try_into_wrapped(self) -> Result<W, Self>;
}

/// Wraps `value` with `ctor`, unless it is already wrapped, in which case it is returned as-is.
///
/// Applying `wrap` twice therefore yields the very same object as applying it once.
#[inline]
pub fn wrap<V, W, F>(value: V, ctor: F) -> W
where
    V: MaybeWrapped<W>,
    F: FnOnce(V) -> W,
{
    value.try_into_wrapped().unwrap_or_else(ctor)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[derive(Clone)]
    enum Node {
        Raw(Arc<str>),
        Tagged(Arc<Node>),
    }

    struct Tagged(Arc<Node>);

    impl MaybeWrapped<Tagged> for Node {
        fn try_into_wrapped(self) -> Result<Tagged, Self> {
            match self {
                Node::Tagged(inner) => Ok(Tagged(inner)),
                raw => Err(raw),
            }
        }
    }

    impl MaybeWrapped<Tagged> for Tagged {
        fn try_into_wrapped(self) -> Result<Tagged, Self> {
            Ok(self)
        }
    }

    fn tag(node: Node) -> Tagged {
        Tagged(Arc::new(node))
    }

    #[test]
    fn test_wrap_constructs_once() {
        let once = wrap(Node::Raw("x".into()), tag);
        let inner = once.0.clone();
        let twice = wrap(once, |_| unreachable!("already wrapped"));
        assert!(Arc::ptr_eq(&inner, &twice.0));
    }

    #[test]
    fn test_wrap_recognises_wrapped_variant() {
        let inner = Arc::new(Node::Raw("y".into()));
        let wrapped = wrap(Node::Tagged(inner.clone()), tag);
        assert!(Arc::ptr_eq(&inner, &wrapped.0));
        assert!(matches!(&*wrapped.0, Node::Raw(s) if &**s == "y"));
    }
}
