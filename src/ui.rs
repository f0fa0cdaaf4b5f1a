use handlebars::Handlebars;
use serde::{Deserialize, Serialize};

use super::*;

/// One-shot message shown on the next dashboard page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Flash {
    pub kind : FlashKind,
    pub text : String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FlashKind {
    Success,
    Danger,
}

impl Flash {
    pub fn success<S : Into<String>>(text : S) -> Self {
        Self {
            kind : FlashKind::Success,
            text : text.into(),
        }
    }

    pub fn danger<S : Into<String>>(text : S) -> Self {
        Self {
            kind : FlashKind::Danger,
            text : text.into(),
        }
    }
}

pub struct Renderer(Handlebars<'static>);

impl Renderer {
    pub fn new() -> Result<Self> {
        let mut t = Handlebars::new();
        t.set_strict_mode(true);

        t.register_partial("layout", include_str!("../ui/layout.html"))?;

        macro_rules! register {
            ($(($name:expr, $path:expr))*) => {
                $(
                    t.register_template_string($name, include_str!($path))?;
                )*
            };
        }

        register! {
            ("login", "../ui/login.html")
            ("register", "../ui/register.html")
            ("admin", "../ui/admin.html")
            ("profile", "../ui/profile.html")
        }

        Ok(Self(t))
    }

    pub fn login(
        &self,
        error : Option<&str>,
        username : &str,
    ) -> Result<String> {
        #[derive(Serialize)]
        struct Ctx<'a> {
            error :    Option<&'a str>,
            username : &'a str,
        }

        Ok(self.0.render("login", &Ctx {
            error,
            username,
        })?)
    }

    pub fn register(
        &self,
        error : Option<&str>,
        username : &str,
        display_name : &str,
    ) -> Result<String> {
        #[derive(Serialize)]
        struct Ctx<'a> {
            error :        Option<&'a str>,
            username :     &'a str,
            display_name : &'a str,
        }

        Ok(self.0.render("register", &Ctx {
            error,
            username,
            display_name,
        })?)
    }

    pub fn admin(
        &self,
        user : &models::User,
        links : &[models::Link],
        flash : Option<&Flash>,
    ) -> Result<String> {
        #[derive(Serialize)]
        struct Ctx<'a> {
            user :         &'a models::User,
            display_name : &'a str,
            bio :          &'a str,
            picture_url :  String,
            links :        &'a [models::Link],
            flash :        Option<&'a Flash>,
        }

        Ok(self.0.render("admin", &Ctx {
            user,
            display_name : user.display_name.as_deref().unwrap_or_default(),
            bio : user.bio.as_deref().unwrap_or_default(),
            picture_url : user.picture_url(),
            links,
            flash,
        })?)
    }

    pub fn profile(&self, profile : &models::Profile) -> Result<String> {
        #[derive(Serialize)]
        struct Ctx<'a> {
            user :        &'a models::User,
            name :        &'a str,
            bio :         &'a str,
            picture_url : String,
            since :       String,
            links :       &'a [models::Link],
        }

        let user = &profile.user;

        Ok(self.0.render("profile", &Ctx {
            user,
            name : user.shown_name(),
            bio : user.bio.as_deref().unwrap_or_default(),
            picture_url : user.picture_url(),
            since : user.created.month_year(),
            links : &profile.links,
        })?)
    }

    pub fn index(&self) -> &'static str {
        include_str!("../ui/index.html")
    }

    pub fn default_picture(&self) -> &'static str {
        include_str!("../ui/default.svg")
    }
}
