// Copyright (c) 2025 - Cowboy AI, Inc.
//! Property-Based Tests Entry Point
//!
//! This test suite uses proptest to verify laws that must hold for all
//! valid inputs to the operators, schedulers and backpressure buffers.

mod property;
