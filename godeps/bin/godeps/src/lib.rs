// Copyright 2023 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

pub mod buildfile;
pub mod driver;
pub mod error;
pub mod knownimports;
pub mod licences;
pub mod model;
pub mod progress;
pub mod resolve;
pub mod rules;
pub mod testutils;
