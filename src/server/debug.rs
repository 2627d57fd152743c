//! HTML debug page listing registered services and their call counts.

use std::sync::Arc;

use crate::service::Service;

/// Render the `/debug/rpc` page for a sorted service snapshot.
pub(crate) fn render(services: &[Arc<Service>]) -> String {
    let mut html = String::from("<html>\n<body>\n<title>GeeRPC Services</title>\n");

    for service in services {
        html.push_str("<hr>\nService ");
        html.push_str(service.name());
        html.push_str("\n<hr>\n<table>\n");
        html.push_str("<th align=center>Method</th><th align=center>Calls</th>\n");

        let mut methods: Vec<_> = service.methods().collect();
        methods.sort_by_key(|m| m.name());
        for method in methods {
            html.push_str(&format!(
                "<tr>\n<td align=left font=fixed>{}({}, {}) error</td>\n<td align=center>{}</td>\n</tr>\n",
                method.name(),
                method.args_type(),
                method.reply_type(),
                method.call_count(),
            ));
        }
        html.push_str("</table>\n");
    }

    html.push_str("</body>\n</html>\n");
    html
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::{Deserialize, Serialize};

    #[derive(Serialize, Deserialize)]
    struct Args {
        num1: i64,
        num2: i64,
    }

    #[test]
    fn test_render_lists_services_and_methods() {
        let service = Arc::new(
            Service::builder("Foo")
                .method("Sum", |args: Args| async move {
                    Ok::<i64, String>(args.num1 + args.num2)
                })
                .build(),
        );

        let html = render(&[service]);
        assert!(html.contains("Service Foo"));
        assert!(html.contains("Sum("));
        assert!(html.contains("i64) error"));
        // No calls yet.
        assert!(html.contains("<td align=center>0</td>"));
    }

    #[test]
    fn test_render_empty_registry() {
        let html = render(&[]);
        assert!(html.contains("GeeRPC Services"));
        assert!(!html.contains("Service "));
    }
}
