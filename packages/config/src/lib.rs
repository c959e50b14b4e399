// ABOUTME: Shared configuration surface for devdock packages
// ABOUTME: Re-exports the environment variable names read by the orchestrator and CLI

pub mod constants;
