// Copyright (c) 2025 - Cowboy AI, Inc.
//! Property-Based Tests Module
//!
//! Operator laws, disposal guarantees and virtual time ordering, checked
//! with proptest over generated inputs.

mod operator_laws;
mod runtime_laws;
