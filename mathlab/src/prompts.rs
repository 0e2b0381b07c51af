//! Prompt templates
//!
//! Two fixed templates per query: a short explanation request and a
//! plot-script request. The query is interpolated verbatim.

/// The pair of prompts sent for one query
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptSet {
    pub explanation: String,
    pub code: String,
}

impl PromptSet {
    pub fn for_query(query: &str) -> Self {
        Self {
            explanation: explanation_prompt(query),
            code: code_prompt(query),
        }
    }
}

/// Ask for a plain-language explanation, three sentences at most
pub fn explanation_prompt(query: &str) -> String {
    format!(
        "Explain this algebra concept to a high schooler simply (3 sentences max): {}",
        query
    )
}

/// Ask for a plot script that binds `fig`
pub fn code_prompt(query: &str) -> String {
    format!(
        r#"You are a Visual Math Tutor for High School Algebra.
The student asked: "{query}"

Goal: Write a PLOT SCRIPT that visualizes this concept. A plot script is a list
of JSON commands, one JSON object per line. Two libraries are pre-loaded:
`np` (numeric arrays) and `plt` (plotting).

COMMANDS:
{{"op": "let", "name": "x", "expr": "np.linspace(-10, 10, 200)"}}
{{"op": "figure", "store": "fig", "title": "...", "xlabel": "x", "ylabel": "y"}}
{{"op": "plot", "x": "x", "y": "x**2", "label": "y = x^2", "color": "blue", "style": "solid"}}
{{"op": "scatter", "x": "[0, 1]", "y": "[0, 1]", "label": "points"}}
{{"op": "bar", "x": "[1, 2, 3]", "height": "[4, 5, 6]"}}
{{"op": "axhline", "y": "0"}}
{{"op": "axvline", "x": "0"}}
{{"op": "text", "x": "2", "y": "4", "text": "vertex"}}
{{"op": "grid"}}
{{"op": "legend"}}
{{"op": "limits", "x": [-10, 10], "y": [-10, 10]}}
{{"op": "aspect_equal"}}

EXPRESSIONS ("expr", "x", "y", "height"):
- numbers, variable names, + - * / % and ** for powers, parentheses
- lists like [1, 2, 3]
- np.pi, np.e, np.linspace(start, stop, num), np.arange(start, stop, step)
- np.sin, np.cos, np.tan, np.exp, np.log, np.sqrt, np.abs, np.arctan2 and friends
- arrays combine element-wise

RULES:
1. The script must create a figure bound to the name "fig".
2. It must plot the relevant graph, shape, or point set.
3. Add clear labels, grid lines, and a title.
4. Static visual only: there is no show, input, slider, or animation command.
5. Output ONLY the JSON commands. No markdown ``` ticks. No explanations.

Example output for "Graph y = x^2":
{{"op": "let", "name": "x", "expr": "np.linspace(-10, 10, 200)"}}
{{"op": "figure", "title": "y = x^2", "xlabel": "x", "ylabel": "y"}}
{{"op": "plot", "x": "x", "y": "x**2", "label": "y = x^2"}}
{{"op": "grid"}}
{{"op": "legend"}}"#,
        query = query
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_both_prompts_contain_query_verbatim() {
        let queries = [
            "Graph y = 3x - 2",
            "Show me a circle with radius 5",
            "what's {x} when \"y\" = 2?",
            "  leading and trailing  ",
            "ñ ∑ √2",
        ];
        for q in queries {
            let set = PromptSet::for_query(q);
            assert!(set.explanation.contains(q), "explanation missing {:?}", q);
            assert!(set.code.contains(q), "code prompt missing {:?}", q);
        }
    }

    #[test]
    fn test_explanation_limits_length() {
        assert!(explanation_prompt("slope").contains("3 sentences max"));
    }

    #[test]
    fn test_code_prompt_rules() {
        let p = code_prompt("Graph y = 3x - 2");
        assert!(p.contains("\"fig\""));
        assert!(p.contains("No markdown"));
        assert!(p.contains("np.linspace"));
        // braces in the template survive formatting
        assert!(p.contains(r#"{"op": "grid"}"#));
    }

    #[test]
    fn test_code_prompt_example_is_a_valid_script() {
        let p = code_prompt("anything");
        let example = p.split("Example output for \"Graph y = x^2\":\n").nth(1).unwrap();
        let ns = crate::script::run(example, &crate::SandboxConfig::default()).unwrap();
        assert!(ns.figure("fig").is_some());
    }
}
