// ABOUTME: Cryptography module for callback token signing and verification
// ABOUTME: Centralizes all cryptographic operations for the retell backend
//
// Licensed under either of Apache License, Version 2.0 or MIT License at your option.

//! Cryptographic utilities for the retell backend

pub mod tokens;

pub use tokens::{CallbackAction, CallbackError, SigningDomain, SummaryWindow, TokenSigner};
