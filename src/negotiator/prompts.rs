//! System prompts and user-prompt builders for the negotiation LLM rounds.
//!
//! Inputs are framed with `--[ name ]-- ... --[END]--` delimiters so the
//! model can tell caller data from instructions. Evaluator prompts require
//! the verdict as a fenced ```json block; the extractor refuses anything
//! else, so the instruction is load-bearing.

/// System prompt for designing the initial protocol document.
pub const PROTOCOL_DESIGNER_PROMPT: &str = r#"
You are a protocol design expert. Your task is to design a communication protocol document based on given requirements and input/output descriptions.
The protocol document should be clear, complete, and follow standard specifications and industry best practices.

1. Please follow these requirements when designing protocol documents:
- Request and response formats should use JSON whenever possible, strictly following RFC8259
  - Use JSON Schema (draft-2020-12) to describe data formats, clearly specify required and optional fields
  - Field names should follow camelCase and be concise and clear
  - Character encoding should consistently use UTF-8
- For special scenarios like efficient data transmission, other formats like binary can be used
- Please use a request/response pattern to design the protocol

2. Request/Response Design Specifications:
- When the protocol has multiple requests/responses, use messageType and messageId for distinction; a response message's messageType and messageId must match its request
- Response messages must carry a code field to distinguish success and failure, using HTTP standard status codes

3. Error Handling Requirements:
- Use standard HTTP status codes
- 200 series for success, 400 series for client errors, 500 series for server errors
- Custom error codes may be used for special errors
- Provide clear error description messages

4. Reply in markdown format with the following sections (optional sections may be omitted):
# Requirements
# Protocol Flow
## Interaction Flow
## State Transitions [Optional]
## Timeout Handling [Optional]
# Data Format
## Request Message Format
## Response Message Format
# Error Handling
"#;

const RESULT_FORMAT_INSTRUCTION: &str = r#"
# Output
Reply with exactly one fenced ```json block containing a NegotiationResult object:
{
    "status": "negotiating/accepted/rejected",
    "candidate_protocol": "complete protocol content when status is negotiating, empty string otherwise",
    "modification_summary": "summary of your modifications or reasons for rejection"
}

Note: when status is "negotiating", candidate_protocol must contain the complete protocol content, not just the modifications. Use modification_summary to explain what changed and why.
"#;

/// System prompt for the requester-side evaluator.
pub fn requester_evaluation_prompt() -> String {
    format!(
        r#"
You are a senior communication protocol negotiation expert. Your goal is to negotiate a protocol that both parties can accept for data communication. As a service requester, your goal is to have the service provider meet your requirements as much as possible.

# Input Information
Your decision inputs include:
- requirement: your original requirements for the protocol
- input_description: your expected input format description
- output_description: your expected output format description
- counterparty_latest_protocol: the latest protocol proposal from the counterparty
- your_previous_protocol: your previous protocol proposal (if any)
- counterparty_modification_summary: summary of the counterparty's modifications (if your_previous_protocol exists)

# Decision Process
1. Compare the counterparty's protocol with your original requirements: verify all functional requirements are met and the design aligns with your specifications.
2. Evaluate data formats: input against input_description, output against output_description, and check for missing or unnecessary fields.
3. Review protocol design: flow, error handling, edge cases.
4. Make a decision:
   - ACCEPTED: the protocol fully meets your requirements
   - REJECTED: there are major incompatibilities
   - NEGOTIATING: minor modifications are needed (provide detailed modification suggestions)
{RESULT_FORMAT_INSTRUCTION}"#
    )
}

/// System prompt for the provider-side evaluator.
pub fn provider_evaluation_prompt() -> String {
    format!(
        r#"
You are a senior communication protocol negotiation expert. Your goal is to negotiate a protocol that both parties can accept for data communication. As a service provider, you aim to meet the service requester's needs as much as possible.

# Input Information
Your decision inputs include:
- counterparty_latest_protocol: the latest protocol proposal from the counterparty (requirements are included in the protocol content)
- your_previous_protocol: your previous protocol proposal (if any)
- counterparty_modification_summary: summary of the counterparty's modifications (if your_previous_protocol exists)
- capability_info_history: previous capability information obtained from the get_capability_info tool

# Decision Process
1. Compare the counterparty's protocol with your capabilities: review capability_info_history, verify the functional requirements are implementable on your system.
2. Evaluate data formats: required input fields present and processable, all output fields producible, no incompatible field definitions.
3. Review protocol design: feasible flow, error handling your system supports, edge cases covered.
4. Make a decision:
   - ACCEPTED: you can fully implement the protocol
   - REJECTED: there are major capability mismatches
   - NEGOTIATING: minor adjustments are needed (provide detailed modification suggestions)

# Decision Tools
You can call the get_capability_info tool to check whether you can meet the counterparty's requirements and whether the protocol's input and output data are correct for your system.
{RESULT_FORMAT_INSTRUCTION}"#
    )
}

/// User prompt for the initial protocol design round.
pub fn initial_design_input(
    requirement: &str,
    input_description: &str,
    output_description: &str,
) -> String {
    format!(
        r#"
Please design a protocol with:

--[ requirement ]--
{requirement}
--[END]--

--[ input_description ]--
{input_description}
--[END]--

--[ output_description ]--
{output_description}
--[END]--

The protocol should be practical and implementable."#
    )
}

/// User prompt for a requester-side evaluation round.
pub fn requester_evaluation_input(
    requirement: &str,
    input_description: &str,
    output_description: &str,
    peer_candidate: &str,
    own_previous: Option<&str>,
    peer_modification_summary: &str,
) -> String {
    format!(
        r#"
Please evaluate this protocol proposal:

--[ requirement ]--
{requirement}
--[END]--

--[ input_description ]--
{input_description}
--[END]--

--[ output_description ]--
{output_description}
--[END]--

--[ counterparty_latest_protocol ]--
{peer_candidate}
--[END]--

--[ your_previous_protocol ]--
{}
--[END]--

--[ counterparty_modification_summary ]--
{}
--[END]--"#,
        own_previous.unwrap_or(""),
        summary_or_none(peer_modification_summary),
    )
}

/// User prompt for a provider-side evaluation round.
pub fn provider_evaluation_input(
    peer_candidate: &str,
    own_previous: Option<&str>,
    peer_modification_summary: &str,
    capability_info_history: &[String],
) -> String {
    let history =
        serde_json::to_string_pretty(capability_info_history).unwrap_or_else(|_| "[]".into());
    format!(
        r#"
Please evaluate this protocol proposal:

--[ counterparty_latest_protocol ]--
{peer_candidate}
--[END]--

--[ your_previous_protocol ]--
{}
--[END]--

--[ counterparty_modification_summary ]--
{}
--[END]--

--[ capability_info_history ]--
{history}
--[END]--"#,
        own_previous.unwrap_or(""),
        summary_or_none(peer_modification_summary),
    )
}

/// Tool specification for the provider's capability lookup.
#[must_use]
pub fn capability_tool_spec() -> serde_json::Value {
    serde_json::json!({
        "type": "function",
        "function": {
            "name": "get_capability_info",
            "description": "Get capability information to check if requirements can be met",
            "parameters": {
                "type": "object",
                "properties": {
                    "requirement": {
                        "type": "string",
                        "description": "Protocol requirements description"
                    },
                    "input_description": {
                        "type": "string",
                        "description": "Protocol document description of request or input data, including fields, field formats, field descriptions, and whether they are required"
                    },
                    "output_description": {
                        "type": "string",
                        "description": "Protocol document description of response or output data, including fields, field formats, field descriptions, and whether they are required"
                    }
                },
                "required": ["requirement", "input_description", "output_description"]
            }
        }
    })
}

fn summary_or_none(summary: &str) -> &str {
    if summary.trim().is_empty() {
        "None"
    } else {
        summary
    }
}
