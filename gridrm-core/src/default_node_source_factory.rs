// Copyright 2025 The NativeLink Authors. All rights reserved.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//    http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use std::sync::Arc;

use gridrm_config::node_sources::{InfrastructureSpec, PolicySpec};

use crate::infrastructure::{Infrastructure, ManualInfrastructure, StaticUrlsInfrastructure};
use crate::policy::{NodeSourcePolicy, RestrictedPolicy, StaticPolicy};

pub fn infrastructure_factory(spec: &InfrastructureSpec) -> Arc<dyn Infrastructure> {
    match spec {
        InfrastructureSpec::manual => Arc::new(ManualInfrastructure),
        InfrastructureSpec::static_urls(config) => {
            Arc::new(StaticUrlsInfrastructure::new(config.urls.iter().cloned()))
        }
    }
}

pub fn policy_factory(spec: &PolicySpec) -> Arc<dyn NodeSourcePolicy> {
    match spec {
        PolicySpec::static_policy => Arc::new(StaticPolicy),
        PolicySpec::restricted(config) => {
            Arc::new(RestrictedPolicy::new(config.allowed_clients.iter().cloned()))
        }
    }
}
