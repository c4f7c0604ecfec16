//! A map of dense integer key to value.

use std::marker::PhantomData;

pub trait Index: From<usize> + Copy {
    fn index(&self) -> usize;
}

/// Declares a copyable id newtype over usize that can key a DenseMap.
macro_rules! dense_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, PartialOrd, Ord)]
        pub struct $name(usize);
        impl $crate::densemap::Index for $name {
            fn index(&self) -> usize {
                self.0
            }
        }
        impl From<usize> for $name {
            fn from(u: usize) -> $name {
                $name(u)
            }
        }
    };
}
pub(crate) use dense_id;

/// A map of a dense integer key to value, implemented as a vector.
/// Effectively wraps Vec<V> to provide typed keys.
pub struct DenseMap<K, V> {
    vec: Vec<V>,
    key_type: PhantomData<K>,
}

impl<K, V> Default for DenseMap<K, V> {
    fn default() -> Self {
        DenseMap {
            vec: Vec::default(),
            key_type: PhantomData,
        }
    }
}

impl<K: Index, V> std::ops::Index<K> for DenseMap<K, V> {
    type Output = V;

    fn index(&self, k: K) -> &Self::Output {
        &self.vec[k.index()]
    }
}

impl<K: Index, V> std::ops::IndexMut<K> for DenseMap<K, V> {
    fn index_mut(&mut self, k: K) -> &mut Self::Output {
        &mut self.vec[k.index()]
    }
}

impl<K: Index, V> DenseMap<K, V> {
    pub fn len(&self) -> usize {
        self.vec.len()
    }

    pub fn push(&mut self, val: V) -> K {
        let id = K::from(self.vec.len());
        self.vec.push(val);
        id
    }

    pub fn all_ids(&self) -> impl Iterator<Item = K> {
        (0..self.vec.len()).map(K::from)
    }

    pub fn iter(&self) -> impl Iterator<Item = (K, &V)> {
        self.vec.iter().enumerate().map(|(i, v)| (K::from(i), v))
    }
}
