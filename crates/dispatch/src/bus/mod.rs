// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

pub mod adapter;
pub mod notify;
pub mod outbox;

pub use adapter::{BusAdapter, NatsBusAdapter};
pub use notify::{InMemoryNotificationSink, NatsNotificationSink, NotificationSink};
pub use outbox::ResponseOutbox;
