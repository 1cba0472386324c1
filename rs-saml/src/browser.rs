use log::warn;

/// Hands a sign-in URL to the user.
///
/// Implementations must not wait for the user to finish signing in; the
/// server reports completion on its own.
pub trait UrlOpener {
    fn open(&self, url: &str);
}

impl<F: Fn(&str)> UrlOpener for F {
    fn open(&self, url: &str) {
        self(url)
    }
}

/// Opens URLs in the desktop's default browser.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemBrowser;

impl UrlOpener for SystemBrowser {
    fn open(&self, url: &str) {
        if let Err(err) = open::that(url) {
            warn!("could not open a browser ({}), visit {} to sign in", err, url);
        }
    }
}
