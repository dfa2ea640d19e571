// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2025-present Datadog, Inc.

// Correctness
#![deny(clippy::indexing_slicing)]
#![deny(clippy::string_slice)]
#![deny(clippy::cast_possible_wrap)]
#![deny(clippy::undocumented_unsafe_blocks)]
// Panicking code
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]
#![deny(clippy::unimplemented)]
#![deny(clippy::todo)]
// Debug code that shouldn't be in production
#![deny(clippy::dbg_macro)]
#![deny(clippy::print_stdout)]
#![deny(clippy::print_stderr)]

//! Entity tagger.
//!
//! Workload metadata events are turned into per-source [`TagInfo`]s, merged
//! per entity in the [`TagStore`](store::TagStore), and served through
//! [`Tagger`] queries, subscriptions and origin detection.

pub mod api;
pub mod collector;
pub mod config;
pub mod entity;
pub mod errors;
pub mod labels;
pub mod normalize;
pub mod origin;
pub mod provider;
pub mod store;
pub mod subscription;
pub mod taglist;
pub mod tagger;
pub mod types;
pub mod ust;
pub mod workloadmeta;

pub use config::{TaggerConfig, load_config};
pub use errors::Error;
pub use origin::{ExternalData, LocalData, OriginInfo, ProductOrigin};
pub use provider::{ContainerMetaProvider, PodContainerIndex};
pub use subscription::{DeliveryPolicy, EntityEvent, EventType, Subscription, SubscriptionFilter};
pub use taglist::{HashingTagsAccumulator, TagAccumulator};
pub use tagger::{Tagger, TaggerListEntity, TaggerListResponse};
pub use types::{EntityId, EntityIdPrefix, StandardTags, TagCardinality, TagInfo};
