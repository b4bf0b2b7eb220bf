/// Sentence the model must include whenever it falls back to a value from the rule text.
pub const ASSUMPTION_NOTICE: &str =
    "No input value given from the query, value will be assumed and taken from the default rules txt file";

pub fn compose_prompt(context: &str, query: &str) -> String {
    format!(
        "You are a generic calculation assistant.
Use the following rule context to answer the user query.
Context:
{context}

Query: {query}

Instructions:
1. Extract the numeric values (price, age, quantity, etc.) from the User Query.
2. If the User Query DOES NOT contain the necessary BASE value (like price, sum assured, etc.), YOU MUST assume the value from the 'Context' (Rule Example or Scenario).
3. IF you assumed a BASE value, you MUST explicitly state in the response that \"{ASSUMPTION_NOTICE}\".
4. Do NOT apply optional discounts, surcharges, or specific conditions (like \"early payment discount\", \"membership\", etc.) unless the User Query explicitly mentions them. Assume the standard/base rate otherwise.
5. Perform the calculation based on the values (either from query or assumed).

Return the answer in strict JSON format with the following keys:
- result: A short summary of the result (e.g. \"Premium is $500\").
- calculated_value: The final calculated number.
- explanation: A detailed explanation of the steps.
"
    )
}
