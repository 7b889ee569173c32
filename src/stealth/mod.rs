//! Anti-detection measures
//!
//! Two halves: JavaScript evasions registered on every new document before
//! page scripts run, and the randomized humanization delays inserted between
//! input events. Both exist to defeat bot-detection heuristics; the delays
//! are a required behavioral property of the driver, not an optimization
//! target.

mod delay;

pub use delay::{ActionKind, DelayPolicy, humanized_delays, zero_delays};

use std::sync::Arc;
use tracing::{debug, warn};

use crate::protocol::TabSession;

// Injected in this order; the webdriver evasion must run before anything a
// detector can observe.
const EVASION_SCRIPTS: &[(&str, &str)] = &[
    (
        "navigator_webdriver",
        r"
        Object.defineProperty(navigator, 'webdriver', {
            get: () => false
        });
        ",
    ),
    (
        "navigator_languages",
        r"
        Object.defineProperty(navigator, 'languages', {
            get: () => ['en-US', 'en']
        });
        ",
    ),
    (
        "navigator_plugins",
        r"
        const mockPlugins = [
            {
                name: 'Chrome PDF Plugin',
                description: 'Portable Document Format',
                filename: 'internal-pdf-viewer',
                mimeTypes: [{ type: 'application/pdf', description: 'Portable Document Format' }]
            },
            {
                name: 'Chrome PDF Viewer',
                description: '',
                filename: 'mhjfbmdgcfjbbpaeojofohoefgiehjai',
                mimeTypes: [{ type: 'application/pdf', description: 'Portable Document Format' }]
            },
            {
                name: 'Native Client',
                description: '',
                filename: 'internal-nacl-plugin',
                mimeTypes: []
            }
        ];
        const pluginsProto = Object.getPrototypeOf(navigator.plugins);
        Object.defineProperty(navigator, 'plugins', {
            get: () => {
                const plugins = {};
                mockPlugins.forEach((plugin, i) => {
                    plugins[i] = plugin;
                    plugins[plugin.name] = plugin;
                });
                Object.setPrototypeOf(plugins, pluginsProto);
                Object.defineProperty(plugins, 'length', { value: mockPlugins.length });
                return plugins;
            }
        });
        ",
    ),
    (
        "chrome_runtime",
        r"
        if (!window.chrome) {
            window.chrome = {};
        }
        if (!window.chrome.runtime) {
            window.chrome.runtime = {
                connect: () => ({
                    onMessage: { addListener: () => {}, removeListener: () => {} },
                    postMessage: () => {}
                })
            };
        }
        ",
    ),
    (
        "webgl_vendor",
        r"
        const getParameterProxyHandler = {
            apply: function(target, ctx, args) {
                const param = (args && args[0]) || null;
                if (param === 37445) {
                    return 'Intel Inc.';
                }
                if (param === 37446) {
                    return 'Intel Iris OpenGL Engine';
                }
                return Reflect.apply(target, ctx, args);
            }
        };
        if (window.WebGLRenderingContext) {
            const getParameter = WebGLRenderingContext.prototype.getParameter;
            WebGLRenderingContext.prototype.getParameter = new Proxy(getParameter, getParameterProxyHandler);
        }
        ",
    ),
];

/// Register all evasion scripts on a fresh tab, plus an optional user-agent
/// override.
///
/// Best-effort per script: a tab with most evasions active beats no tab at
/// all. Fails only when not a single script could be registered.
pub async fn inject(tab: &Arc<dyn TabSession>, user_agent: Option<&str>) -> Result<(), crate::protocol::ProtocolError> {
    let mut injected = 0usize;
    for (name, source) in EVASION_SCRIPTS {
        match tab.add_init_script(source).await {
            Ok(()) => {
                debug!("Injected evasion script: {name}");
                injected += 1;
            }
            Err(e) => warn!("Failed to inject evasion script {name}: {e}"),
        }
    }

    if injected == 0 {
        return Err(crate::protocol::ProtocolError::Rpc(
            "failed to inject any evasion script".into(),
        ));
    }

    if let Some(ua) = user_agent {
        // Headless Chrome advertises itself in the default UA.
        let cleaned = ua.replace("Headless", "");
        if let Err(e) = tab.set_user_agent(&cleaned).await {
            warn!("Failed to override user agent: {e}");
        }
    }

    debug!(
        "Stealth injection complete: {injected}/{} scripts active",
        EVASION_SCRIPTS.len()
    );
    Ok(())
}
