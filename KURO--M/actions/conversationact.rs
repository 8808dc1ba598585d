use async_trait::async_trait;
use rand::seq::SliceRandom;

use crate::{
    actions::{Arguments, ToolResult},
    arguments::required_text,
    capabilities::{CapabilityHandler, HandlerError},
};

const JOKES: &[&str] = &[
    "Why don't programmers like nature? It has too many bugs!",
    "Why do Java developers wear glasses? Because they don't C#!",
    "How many programmers does it take to change a light bulb? None, that's a hardware problem!",
    "Why did the developer go broke? Because he used up all his cache!",
    "What's a programmer's favorite hangout place? The Foo Bar!",
    "Why do programmers prefer dark mode? Because light attracts bugs!",
    "I would tell you a UDP joke, but you might not get it.",
    "A SQL query walks into a bar, walks up to two tables and asks... 'Can I join you?'",
];

/// `reply`: plain conversational answer.
#[derive(Debug, Default)]
pub struct ReplyHandler;

#[async_trait]
impl CapabilityHandler for ReplyHandler {
    async fn invoke(&self, arguments: Arguments) -> Result<ToolResult, HandlerError> {
        let message = required_text(&arguments, "message")?;
        Ok(ToolResult::success("Reply sent").with_natural_response(message))
    }
}

/// `tell_joke`: random programming joke.
#[derive(Debug, Default)]
pub struct JokeHandler;

#[async_trait]
impl CapabilityHandler for JokeHandler {
    async fn invoke(&self, _arguments: Arguments) -> Result<ToolResult, HandlerError> {
        let joke = JOKES
            .choose(&mut rand::thread_rng())
            .copied()
            .unwrap_or(JOKES[0]);
        Ok(ToolResult::success("Joke told").with_natural_response(format!("Alright, here's one: {joke}")))
    }
}
