// Licensed to the Apache Software Foundation (ASF) under one
// or more contributor license agreements.  See the NOTICE file
// distributed with this work for additional information
// regarding copyright ownership.  The ASF licenses this file
// to you under the Apache License, Version 2.0 (the
// "License"); you may not use this file except in compliance
// with the License.  You may obtain a copy of the License at
//
//   http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing,
// software distributed under the License is distributed on an
// "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied.  See the License for the
// specific language governing permissions and limitations
// under the License.

//! Confidence bounds on the number of distinct values.
//!
//! Given `num_samples` retained hashes under sampling probability `theta`,
//! the retained count is binomially distributed in the unknown distinct
//! count `n`. The bounds invert the Gaussian approximation of that binomial
//! with a half-unit continuity correction, which keeps
//! `lower_bound <= estimate <= upper_bound` for every valid input and makes
//! all three coincide when `theta == 1`.

use crate::common::NumStdDev;
use crate::error::Error;

fn check_theta(theta: f64) -> Result<(), Error> {
    if !(theta > 0.0 && theta <= 1.0) {
        return Err(Error::invalid_argument(format!(
            "theta must be in (0.0, 1.0], got {theta}"
        )));
    }
    Ok(())
}

// Solves n*theta - sigma*sqrt(n*theta*(1-theta)) = samples for n, with the
// sample count shifted down half a unit.
fn cont_classic_lb(num_samples: f64, theta: f64, num_sdev: f64) -> f64 {
    let n_hat = (num_samples - 0.5) / theta;
    let b = num_sdev * ((1.0 - theta) / theta).sqrt();
    let d = 0.5 * b * ((b * b) + (4.0 * n_hat)).sqrt();
    let center = n_hat + (0.5 * (b * b));
    center - d
}

// Mirror of `cont_classic_lb` with the sample count shifted up half a unit.
fn cont_classic_ub(num_samples: f64, theta: f64, num_sdev: f64) -> f64 {
    let n_hat = (num_samples + 0.5) / theta;
    let b = num_sdev * ((1.0 - theta) / theta).sqrt();
    let d = 0.5 * b * ((b * b) + (4.0 * n_hat)).sqrt();
    let center = n_hat + (0.5 * (b * b));
    center + d
}

/// Approximate lower bound on the distinct count.
///
/// # Errors
///
/// Returns an error if `theta` is outside `(0.0, 1.0]`.
pub fn lower_bound(num_samples: u64, theta: f64, num_std_dev: NumStdDev) -> Result<f64, Error> {
    check_theta(theta)?;
    if theta == 1.0 {
        return Ok(num_samples as f64);
    }
    if num_samples == 0 {
        return Ok(0.0);
    }
    let lb = cont_classic_lb(num_samples as f64, theta, f64::from(num_std_dev.value()));
    // The true count is never below the retained count.
    Ok(lb.max(num_samples as f64))
}

/// Approximate upper bound on the distinct count.
///
/// An empty sketch bounds to zero regardless of theta: `empty` records that
/// no update was ever accepted, so theta carries no information.
///
/// # Errors
///
/// Returns an error if `theta` is outside `(0.0, 1.0]`.
pub fn upper_bound(
    num_samples: u64,
    theta: f64,
    num_std_dev: NumStdDev,
    empty: bool,
) -> Result<f64, Error> {
    check_theta(theta)?;
    if empty {
        return Ok(0.0);
    }
    if theta == 1.0 {
        return Ok(num_samples as f64);
    }
    Ok(cont_classic_ub(
        num_samples as f64,
        theta,
        f64::from(num_std_dev.value()),
    ))
}
