//! Test utilities for property-based testing
//!
//! This module provides generators and helpers for proptest.

#[cfg(test)]
pub mod generators {
    use proptest::prelude::*;

    /// Generate a relative C or C++ source path
    pub fn source_path() -> impl Strategy<Value = String> {
        (
            proptest::collection::vec("[a-z][a-z0-9_]{0,8}", 0..3),
            "[a-z][a-z0-9_]{0,12}",
            prop_oneof![Just("c"), Just("cpp"), Just("cc"), Just("cxx")],
        )
            .prop_map(|(dirs, stem, ext)| {
                let mut path = dirs.join("/");
                if !path.is_empty() {
                    path.push('/');
                }
                format!("{path}{stem}.{ext}")
            })
    }

    /// Generate a compiler flag
    pub fn compiler_flag() -> impl Strategy<Value = String> {
        prop_oneof![
            Just("-Wall".to_string()),
            Just("-g".to_string()),
            "-O[0-3s]",
            "-D[A-Z_]{1,10}",
            "-I[a-z/]{1,16}",
        ]
    }

    /// Generate a node count and a list of edges `(from, to)` between node
    /// indices, in arbitrary order and possibly forming cycles
    pub fn edge_list(max_nodes: usize) -> impl Strategy<Value = (usize, Vec<(usize, usize)>)> {
        (2..=max_nodes).prop_flat_map(|n| {
            (
                Just(n),
                proptest::collection::vec((0..n, 0..n), 0..n * 3),
            )
        })
    }
}

#[cfg(test)]
mod tests {
    use super::generators::*;
    use proptest::prelude::*;

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        #[test]
        fn test_source_path_generator(path in source_path()) {
            prop_assert!(!path.starts_with('/'));
            prop_assert!(path.contains('.'));
        }

        #[test]
        fn test_compiler_flag_generator(flag in compiler_flag()) {
            prop_assert!(flag.starts_with('-'));
        }

        #[test]
        fn test_edge_list_generator((n, edges) in edge_list(12)) {
            prop_assert!(n >= 2);
            prop_assert!(edges.iter().all(|&(a, b)| a < n && b < n));
        }
    }
}
