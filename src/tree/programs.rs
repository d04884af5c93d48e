//! Ready-made tree units used by the demo binary, benchmarks and tests.

use super::{Node, TreeUnit};

/// `sum(n, step)`: adds `step` to an accumulator `n` times
pub fn sum_loop(name: &str) -> TreeUnit {
    TreeUnit::new(
        name,
        Node::seq(vec![
            Node::set_local(0, Node::constant(0i64)),
            Node::repeat(
                Node::arg(0),
                Node::set_local(0, Node::add(Node::local(0), Node::arg(1))),
            ),
            Node::local(0),
        ]),
    )
    .with_locals(["acc"])
}

/// `add(a, b)`
pub fn add(name: &str) -> TreeUnit {
    TreeUnit::new(name, Node::add(Node::arg(0), Node::arg(1)))
}

/// `max(a, b)`
pub fn max(name: &str) -> TreeUnit {
    TreeUnit::new(
        name,
        Node::if_else(Node::less(Node::arg(0), Node::arg(1)), Node::arg(1), Node::arg(0)),
    )
}

/// `check(x)`: raises `RangeError` when `x < 0`, otherwise returns `x`
pub fn check_non_negative(name: &str) -> TreeUnit {
    TreeUnit::new(
        name,
        Node::if_else(
            Node::less(Node::arg(0), Node::constant(0i64)),
            Node::raise("RangeError", "negative input"),
            Node::arg(0),
        ),
    )
}
