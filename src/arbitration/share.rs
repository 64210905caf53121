//! Support notice injected into extension configs

struct Brand {
    name: &'static str,
    site: &'static str,
}

fn brand(browser: &str) -> Brand {
    if browser == "chrome" {
        Brand {
            name: "ProxFlow",
            site: "http://proxflow.com",
        }
    } else {
        Brand {
            name: "ProxTube",
            site: "https://proxtube.com",
        }
    }
}

/// Localized support notice for the `[share]` slot.
///
/// English for `en`, German otherwise. Monetized clients get a plain
/// support link instead of the help request.
pub fn share_notice(browser: &str, language: &str, monetized: bool) -> String {
    let Brand { name, site } = brand(browser);
    let english = language == "en";

    if monetized {
        let (support, more) = if english {
            (format!("Support {name}"), "more")
        } else {
            (format!("Unterstütze {name}"), "mehr")
        };
        return format!(
            r#"<div class="share-notice"><p>{support}:</p><a href="{site}" target="_blank">{more}...</a></div>"#
        );
    }

    let (help, detail, button) = if english {
        (
            format!("We need your help to keep {name} running!"),
            format!("By using ProxPrice price comparison you support {name}."),
            "Help now",
        )
    } else {
        (
            format!("{name} braucht deine Unterstützung um weiter zu bestehen!"),
            format!("Durch die Nutzung des ProxPrice Preisvergleich unterstützt du {name}."),
            "Jetzt helfen",
        )
    };
    let target = if browser == "chrome" {
        r#"href="http://proxprice.com/" target="_blank""#
    } else {
        r##"href="#" id="activateProxTubePriceComparison""##
    };
    format!(
        r#"<div class="share-notice"><p>{help}</p><p>{detail}</p><a {target}>{button}</a></div>"#
    )
}
