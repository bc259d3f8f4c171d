//! The closed set of logic kinds a streamlet can run.

use crate::context::StreamletContext;
use crate::core::{Record, StageKind};
use crate::errors::{Result, ShapeMismatchError};
use crate::shape::{Inlet, Outlet, Shape};
use crate::stream::{PlainStream, RunnableGraph};
use futures::Stream;
use std::fmt;
use std::future::Future;

type BuildFn = Box<dyn FnOnce(&mut StreamletContext) -> Result<RunnableGraph> + Send>;

/// What a streamlet does once started.
///
/// Every variant wraps a builder that wires ports from a
/// [`StreamletContext`] into a [`RunnableGraph`]. The variant records which
/// ports the builder uses so the runner can check it against the shape
/// before anything is wired.
pub enum StreamletLogic {
    /// Produces values into one outlet.
    Source {
        /// The outlet written.
        outlet: String,
        /// Graph builder.
        build: BuildFn,
    },
    /// Reads one inlet in context mode and writes one outlet.
    Transform {
        /// The inlet read.
        inlet: String,
        /// The outlet written.
        outlet: String,
        /// Graph builder.
        build: BuildFn,
    },
    /// Reads one inlet in context mode and applies an effect.
    Sink {
        /// The inlet read.
        inlet: String,
        /// Graph builder.
        build: BuildFn,
    },
    /// Arbitrary wiring over the declared ports.
    Graph {
        /// Graph builder.
        build: BuildFn,
    },
}

impl fmt::Debug for StreamletLogic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Source { outlet, .. } => f.debug_struct("Source").field("outlet", outlet).finish_non_exhaustive(),
            Self::Transform { inlet, outlet, .. } => f
                .debug_struct("Transform")
                .field("inlet", inlet)
                .field("outlet", outlet)
                .finish_non_exhaustive(),
            Self::Sink { inlet, .. } => f.debug_struct("Sink").field("inlet", inlet).finish_non_exhaustive(),
            Self::Graph { .. } => f.debug_struct("Graph").finish_non_exhaustive(),
        }
    }
}

impl StreamletLogic {
    /// Source logic: drains the stream returned by `make` into `outlet`.
    ///
    /// Produced values carry no offsets.
    pub fn produce<T, S, M>(outlet: &Outlet<T>, make: M) -> Self
    where
        T: Record,
        S: Stream<Item = T> + Send + 'static,
        M: FnOnce() -> S + Send + 'static,
    {
        let port = outlet.clone();
        Self::Source {
            outlet: outlet.name().to_string(),
            build: Box::new(move |ctx| Ok(PlainStream::from_stream(make()).to(ctx.plain_sink(&port)?))),
        }
    }

    /// Transform logic: expands each inlet value with `f` and writes the
    /// results, committing the input's offset after each write.
    pub fn process<I, O, It, F>(inlet: &Inlet<I>, outlet: &Outlet<O>, f: F) -> Self
    where
        I: Record,
        O: Record,
        It: IntoIterator<Item = O>,
        F: FnMut(I) -> It + Send + 'static,
    {
        let input = inlet.clone();
        let output = outlet.clone();
        Self::Transform {
            inlet: inlet.name().to_string(),
            outlet: outlet.name().to_string(),
            build: Box::new(move |ctx| {
                let stream = ctx.source_with_context(&input)?.map_concat(f);
                Ok(stream.to(ctx.committable_sink(&output)?))
            }),
        }
    }

    /// Sink logic: runs `effect` for each inlet value, committing its offset
    /// after the effect succeeds.
    pub fn consume<I, F, Fut>(inlet: &Inlet<I>, effect: F) -> Self
    where
        I: Record,
        F: FnMut(I) -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let input = inlet.clone();
        Self::Sink {
            inlet: inlet.name().to_string(),
            build: Box::new(move |ctx| {
                let stream = ctx.source_with_context(&input)?;
                Ok(stream.to(ctx.effect_sink(effect)))
            }),
        }
    }

    /// Graph logic: `build` wires any declared ports itself.
    pub fn graph<F>(build: F) -> Self
    where
        F: FnOnce(&mut StreamletContext) -> Result<RunnableGraph> + Send + 'static,
    {
        Self::Graph {
            build: Box::new(build),
        }
    }

    /// The kind of this logic.
    #[must_use]
    pub fn kind(&self) -> StageKind {
        match self {
            Self::Source { .. } => StageKind::Source,
            Self::Transform { .. } => StageKind::Transform,
            Self::Sink { .. } => StageKind::Sink,
            Self::Graph { .. } => StageKind::Graph,
        }
    }

    /// Checks that the logic fits `shape`.
    ///
    /// Sources need no inlets, sinks no outlets, and the ports a variant
    /// names must be declared. Graph logic fits any non-empty shape.
    ///
    /// # Errors
    ///
    /// Returns [`ShapeMismatchError::logic_kind`] or
    /// [`ShapeMismatchError::unknown_port`].
    pub fn validate(&self, owner: &str, shape: &Shape) -> Result<(), ShapeMismatchError> {
        let kind = self.kind().to_string();
        match self {
            Self::Source { outlet, .. } => {
                if !shape.inlets().is_empty() {
                    return Err(ShapeMismatchError::logic_kind(&kind, "source logic cannot have inlets"));
                }
                require_outlet(owner, shape, outlet)
            }
            Self::Transform { inlet, outlet, .. } => {
                require_inlet(owner, shape, inlet)?;
                require_outlet(owner, shape, outlet)
            }
            Self::Sink { inlet, .. } => {
                if !shape.outlets().is_empty() {
                    return Err(ShapeMismatchError::logic_kind(&kind, "sink logic cannot have outlets"));
                }
                require_inlet(owner, shape, inlet)
            }
            Self::Graph { .. } => {
                if shape.is_empty() {
                    Err(ShapeMismatchError::logic_kind(&kind, "graph logic needs at least one port"))
                } else {
                    Ok(())
                }
            }
        }
    }

    /// Wires the logic's ports and returns the graph to run.
    pub(crate) fn build(self, ctx: &mut StreamletContext) -> Result<RunnableGraph> {
        match self {
            Self::Source { build, .. }
            | Self::Transform { build, .. }
            | Self::Sink { build, .. }
            | Self::Graph { build } => build(ctx),
        }
    }
}

fn require_inlet(owner: &str, shape: &Shape, name: &str) -> Result<(), ShapeMismatchError> {
    shape
        .inlet(name)
        .map(|_| ())
        .ok_or_else(|| ShapeMismatchError::unknown_port(owner, name))
}

fn require_outlet(owner: &str, shape: &Shape, name: &str) -> Result<(), ShapeMismatchError> {
    shape
        .outlet(name)
        .map(|_| ())
        .ok_or_else(|| ShapeMismatchError::unknown_port(owner, name))
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::stream;

    fn transform_shape() -> (Inlet<u64>, Outlet<u64>, Shape) {
        let inlet = Inlet::new("in");
        let outlet = Outlet::new("out");
        let shape = Shape::builder().inlet(&inlet).outlet(&outlet).build().unwrap();
        (inlet, outlet, shape)
    }

    #[test]
    fn test_kinds() {
        let (inlet, outlet, _) = transform_shape();
        assert_eq!(StreamletLogic::produce(&outlet, || stream::iter(vec![1_u64])).kind(), StageKind::Source);
        assert_eq!(StreamletLogic::process(&inlet, &outlet, |v| vec![v]).kind(), StageKind::Transform);
        assert_eq!(StreamletLogic::consume(&inlet, |_| async { Ok::<(), anyhow::Error>(()) }).kind(), StageKind::Sink);
        assert_eq!(StreamletLogic::graph(|_| Ok(RunnableGraph::new(async { Ok(()) }))).kind(), StageKind::Graph);
    }

    #[test]
    fn test_transform_fits() {
        let (inlet, outlet, shape) = transform_shape();
        let logic = StreamletLogic::process(&inlet, &outlet, |v| Some(v + 1));
        assert!(logic.validate("t", &shape).is_ok());
    }

    #[test]
    fn test_source_with_inlet_rejected() {
        let (_, outlet, shape) = transform_shape();
        let logic = StreamletLogic::produce(&outlet, || stream::empty::<u64>());
        let err = logic.validate("s", &shape).unwrap_err();
        assert_eq!(err.error_info.code, "SHAPE-006-LOGIC_KIND");
    }

    #[test]
    fn test_sink_with_outlet_rejected() {
        let (inlet, _, shape) = transform_shape();
        let logic = StreamletLogic::consume(&inlet, |_| async { Ok::<(), anyhow::Error>(()) });
        assert!(logic.validate("s", &shape).is_err());
    }

    #[test]
    fn test_undeclared_port_rejected() {
        let (_, outlet, shape) = transform_shape();
        let logic = StreamletLogic::process(&Inlet::<u64>::new("other"), &outlet, |v| vec![v]);
        let err = logic.validate("t", &shape).unwrap_err();
        assert_eq!(err.error_info.code, "SHAPE-004-UNKNOWN_PORT");
    }

    #[test]
    fn test_graph_needs_ports() {
        let logic = StreamletLogic::graph(|_| Ok(RunnableGraph::new(async { Ok(()) })));
        assert!(logic.validate("g", &Shape::default()).is_err());
    }
}
