// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

pub(crate) const CLIENT_NAME: &str = "herdguard.client";

pub(crate) const OPERATION_NAME: &str = "herdguard.operation";

pub(crate) const ACTIVITY_NAME: &str = "herdguard.activity";

#[cfg(test)]
pub(crate) const EVENT_NAME: &str = "herdguard.event";

#[cfg(test)]
pub(crate) const DURATION_NAME: &str = "herdguard.duration_ns";
