use proptest::prelude::*;
use proptest::test_runner::Config as ProptestConfig;
use vantage_source::lexer::{bracket_report, neutralize};
use vantage_source::{repair, validate, IssueKind};

const HOOK_LINES: &[&str] = &[
    "  const [count, setCount] = useState(0);",
    "  const [open, setOpen] = React.useState(false);",
    "  const ref = useRef(null);",
    "  useEffect(() => { document.title = 'Count ${count}'; }, [count]);",
    "  const label = \"Total: ${count}\";",
    "  const next = () => setCount(count 1);",
    "  const bump = () => setCount(prev => prev 2);",
    "  // useState( inside a comment",
    "  const items = React.useMemo(() => ['a', 'b'], []);",
];

const JSX_LINES: &[&str] = &[
    "      <button class=\"btn\" onClick={next}>+</button>",
    "      <p className={text-lg ${count > 5 ? 'text-red-500' : 'text-gray-700'}}>{count}</p>",
    "      <span title=\"Clicked ${count} times\">{`${count 1}`}</span>",
    "      <p>Don't stop: {'Count: ${count}'}</p>",
    "      {items.map(item => <li key={item}>{item}</li>)}",
    "      <div className={`card ${open ? 'open' : ''}`}>{label}</div>",
];

fn arb_component() -> impl Strategy<Value = String> {
    (
        prop::collection::vec(0..HOOK_LINES.len(), 0..6),
        prop::collection::vec(0..JSX_LINES.len(), 0..6),
        any::<bool>(),
        any::<bool>(),
    )
        .prop_map(|(hooks, jsx, fenced, closed)| {
            let mut src = String::from("function App() {\n");
            for i in hooks {
                src.push_str(HOOK_LINES[i]);
                src.push('\n');
            }
            src.push_str("  return (\n    <div>\n");
            for i in jsx {
                src.push_str(JSX_LINES[i]);
                src.push('\n');
            }
            src.push_str("    </div>\n  );\n");
            if closed {
                src.push_str("}\n");
            }
            if fenced {
                src = format!("```jsx\n{}```", src);
            }
            src
        })
}

proptest! {
    #![proptest_config(ProptestConfig {
        // Do not write `.proptest-regressions` files into the repo.
        failure_persistence: None,
        .. ProptestConfig::default()
    })]

    #[test]
    fn prop_repair_is_idempotent(src in arb_component()) {
        let once = repair(&src).source.into_text();
        let again = repair(&once);
        prop_assert_eq!(again.source.text(), once.as_str());
        prop_assert!(again.report.is_empty());
    }

    #[test]
    fn prop_repaired_component_is_structurally_valid(src in arb_component()) {
        let repaired = repair(&src).source.into_text();
        let outcome = validate(&repaired);
        prop_assert!(!outcome.has_error(IssueKind::UnprefixedHook), "{:?}", outcome.errors);
        prop_assert!(!outcome.has_error(IssueKind::UnbalancedBrackets), "{:?}", outcome.errors);
        prop_assert!(outcome.valid, "{:?}\n{}", outcome.errors, repaired);
    }

    #[test]
    fn prop_literal_bodies_do_not_affect_brackets(body in "[a-z{}()\\[\\] <>.,;:=+-]{0,40}") {
        let src = format!(
            "function App() {{\n  const a = '{body}';\n  const b = \"{body}\";\n  const c = `{body}`;\n  // {body}\n  /* {body} */\n  return null;\n}}"
        );
        let report = bracket_report(&neutralize(&src));
        prop_assert!(report.is_balanced(), "{:?}", report);
        prop_assert_eq!(report.braces, (1, 1));
        prop_assert!(!validate(&src).has_error(IssueKind::UnbalancedBrackets));
    }
}
