// Domain models: snapshot tree, time window, pod filter

mod snapshot;
mod window;

pub use snapshot::{
    ClusterSnapshot, ContainerSample, ContainerSnapshot, NewClusterSnapshot, PodSample,
    PodSnapshot,
};
pub use window::{PodFilter, TimeWindow, WILDCARD};
