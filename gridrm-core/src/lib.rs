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

pub mod default_node_source_factory;
pub mod event_bus;
pub mod events;
pub mod infrastructure;
pub mod lease_tracker;
pub mod node;
pub mod node_source;
pub mod node_source_manager;
pub mod ping_monitor;
pub mod policy;
pub mod registry;
pub mod statistics;
